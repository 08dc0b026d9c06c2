//! Signature verification on signed transactions.
//!
//! [`verify_signature`] recovers the spend shape of an input, recomputes the digest each
//! signature commits to and attributes every signature to at most one of the keys the
//! spend reveals (or, for key-path spends, the output key).

use crate::bitcoin::secp256k1::{Message, Secp256k1, Verification};
use crate::bitcoin::taproot::{self, LeafVersion, TapLeafHash};
use crate::bitcoin::{ecdsa, Amount, PublicKey, Transaction, TxOut, XOnlyPublicKey};
use crate::error::{Error, Result};
use crate::psbt::sighash::{legacy_sighash, segwit_v0_sighash, taproot_sighash};
use crate::script_pattern::{parse_signature_script, ScriptDescriptor};

/// Restrictions on what [`verify_signature`] checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationSettings {
    /// Only attribute signatures to this key: 33 or 65 bytes, or 32 bytes x-only.
    pub public_key: Option<Vec<u8>>,
    /// Only check the signature in this slot.
    pub signature_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signer {
    Ecdsa(PublicKey),
    Schnorr(XOnlyPublicKey),
}

impl Signer {
    /// Full keys match their x-only form too.
    fn matches(&self, filter: &[u8]) -> bool {
        match (self, filter.len()) {
            (Signer::Ecdsa(key), 32) => key.inner.x_only_public_key().0.serialize() == filter,
            (Signer::Ecdsa(key), 65) => key.inner.serialize_uncompressed() == filter,
            (Signer::Ecdsa(key), _) => key.to_bytes() == filter,
            (Signer::Schnorr(key), 32) => key.serialize() == filter,
            (Signer::Schnorr(key), 33) => key.serialize() == filter[1..],
            (Signer::Schnorr(_), _) => false,
        }
    }

    fn verify<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        message: &Message,
        signature: &ParsedSignature,
    ) -> bool {
        match (self, signature) {
            (Signer::Ecdsa(key), ParsedSignature::Ecdsa(sig)) => {
                secp.verify_ecdsa(message, &sig.signature, &key.inner).is_ok()
            }
            (Signer::Schnorr(key), ParsedSignature::Schnorr(sig)) => {
                secp.verify_schnorr(&sig.signature, message, key).is_ok()
            }
            _ => false,
        }
    }
}

/// Outcome for one signature of an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureVerification {
    Matched { signer: Signer, signature: Vec<u8> },
    Unmatched,
}

enum ParsedSignature {
    Ecdsa(ecdsa::Signature),
    Schnorr(taproot::Signature),
}

fn taproot_prevouts<'a>(tx: &Transaction, prevouts: Option<&'a [TxOut]>) -> Result<&'a [TxOut]> {
    match prevouts {
        Some(prevouts) if prevouts.len() == tx.input.len() => Ok(prevouts),
        Some(prevouts) => Err(Error::validation(format!(
            "taproot verification needs all {} prevouts, got {}",
            tx.input.len(),
            prevouts.len()
        ))),
        None => Err(Error::validation(
            "taproot verification needs the prevouts of every input",
        )),
    }
}

fn output_key(prevout: &TxOut) -> Result<XOnlyPublicKey> {
    let script = &prevout.script_pubkey;
    if !script.is_p2tr() {
        return Err(Error::validation("spent output is not a taproot output"));
    }
    XOnlyPublicKey::from_slice(&script.as_bytes()[2..34])
        .map_err(|e| Error::validation(format!("invalid output key: {}", e)))
}

/// Digest a signature commits to, given its sighash byte.
fn signature_message(
    descriptor: &ScriptDescriptor,
    tx: &Transaction,
    index: usize,
    amount: Amount,
    prevouts: Option<&[TxOut]>,
    signature: &ParsedSignature,
) -> Result<Message> {
    match (descriptor, signature) {
        (
            ScriptDescriptor::P2sh2of3(_) | ScriptDescriptor::P2shP2pk { .. },
            ParsedSignature::Ecdsa(sig),
        ) => {
            let script = descriptor
                .pub_script()
                .ok_or_else(|| Error::IllegalState("legacy spend without script".to_string()))?;
            legacy_sighash(tx, index, script, sig.sighash_type.to_u32())
        }
        (
            ScriptDescriptor::P2shP2wsh2of3(d) | ScriptDescriptor::P2wsh2of3(d),
            ParsedSignature::Ecdsa(sig),
        ) => segwit_v0_sighash(tx, index, &d.pub_script, amount, sig.sighash_type),
        (ScriptDescriptor::TaprootKeyPath { .. }, ParsedSignature::Schnorr(sig)) => {
            let prevouts = taproot_prevouts(tx, prevouts)?;
            let hash = taproot_sighash(tx, index, prevouts, None, sig.sighash_type)?;
            Ok(Message::from_digest(hash))
        }
        (ScriptDescriptor::TaprootScriptPath(d), ParsedSignature::Schnorr(sig)) => {
            let prevouts = taproot_prevouts(tx, prevouts)?;
            let leaf_version = LeafVersion::from_consensus(d.leaf_version)
                .map_err(|e| Error::validation(format!("invalid leaf version: {}", e)))?;
            let leaf_hash = TapLeafHash::from_script(&d.pub_script, leaf_version);
            let hash = taproot_sighash(tx, index, prevouts, Some(leaf_hash), sig.sighash_type)?;
            Ok(Message::from_digest(hash))
        }
        _ => Err(Error::IllegalState(
            "signature encoding does not fit the spend type".to_string(),
        )),
    }
}

fn parse_signature(descriptor: &ScriptDescriptor, bytes: &[u8]) -> Result<ParsedSignature> {
    if descriptor.is_taproot() {
        // 65-byte signatures carry an explicit sighash byte
        taproot::Signature::from_slice(bytes)
            .map(ParsedSignature::Schnorr)
            .map_err(|e| Error::validation(format!("invalid schnorr signature: {}", e)))
    } else {
        ecdsa::Signature::from_slice(bytes)
            .map(ParsedSignature::Ecdsa)
            .map_err(|e| Error::validation(format!("invalid ecdsa signature: {}", e)))
    }
}

fn candidate_signers(
    descriptor: &ScriptDescriptor,
    tx: &Transaction,
    index: usize,
    prevouts: Option<&[TxOut]>,
) -> Result<Vec<Signer>> {
    Ok(match descriptor {
        ScriptDescriptor::P2shP2pk { public_key, .. } => vec![Signer::Ecdsa(*public_key)],
        ScriptDescriptor::P2sh2of3(d)
        | ScriptDescriptor::P2shP2wsh2of3(d)
        | ScriptDescriptor::P2wsh2of3(d) => {
            d.public_keys.iter().copied().map(Signer::Ecdsa).collect()
        }
        ScriptDescriptor::TaprootScriptPath(d) => {
            d.public_keys.iter().copied().map(Signer::Schnorr).collect()
        }
        ScriptDescriptor::TaprootKeyPath { .. } => {
            let prevouts = taproot_prevouts(tx, prevouts)?;
            vec![Signer::Schnorr(output_key(&prevouts[index])?)]
        }
    })
}

/// Attribute each signature of input `index` to the key that made it.
///
/// Placeholder slots of partially signed spends are skipped. Taproot spends need the
/// prevouts of every input.
pub fn verify_signature(
    tx: &Transaction,
    index: usize,
    amount: Amount,
    settings: &VerificationSettings,
    prevouts: Option<&[TxOut]>,
) -> Result<Vec<SignatureVerification>> {
    let input = tx.input.get(index).ok_or(Error::InputIndexOutOfBounds {
        index,
        count: tx.input.len(),
    })?;
    let descriptor = parse_signature_script(&input.script_sig, &input.witness)?;
    let signers: Vec<Signer> = candidate_signers(&descriptor, tx, index, prevouts)?
        .into_iter()
        .filter(|s| settings.public_key.as_deref().map_or(true, |f| s.matches(f)))
        .collect();

    let secp = Secp256k1::verification_only();
    let mut verifications = Vec::new();
    for (slot, signature) in descriptor.signatures().iter().enumerate() {
        if settings.signature_index.is_some_and(|i| i != slot) {
            continue;
        }
        let Some(bytes) = signature.as_bytes() else {
            continue;
        };
        let parsed = parse_signature(&descriptor, bytes)?;
        let message = signature_message(&descriptor, tx, index, amount, prevouts, &parsed)?;
        let matched: Vec<&Signer> = signers
            .iter()
            .filter(|s| s.verify(&secp, &message, &parsed))
            .collect();
        verifications.push(match matched.as_slice() {
            [] => SignatureVerification::Unmatched,
            [signer] => SignatureVerification::Matched {
                signer: **signer,
                signature: bytes.to_vec(),
            },
            _ => {
                return Err(Error::IllegalState(format!(
                    "signature in slot {} matches {} keys",
                    slot,
                    matched.len()
                )))
            }
        });
    }
    Ok(verifications)
}

/// Whether input `index` carries a valid signature by `public_key`.
pub fn verify_signature_with_key(
    tx: &Transaction,
    index: usize,
    amount: Amount,
    public_key: &[u8],
    prevouts: Option<&[TxOut]>,
) -> Result<bool> {
    let settings = VerificationSettings {
        public_key: Some(public_key.to_vec()),
        signature_index: None,
    };
    Ok(verify_signature(tx, index, amount, &settings, prevouts)?
        .iter()
        .any(|v| matches!(v, SignatureVerification::Matched { .. })))
}

/// Outcome for every signature of input `index`.
pub fn get_signature_verifications(
    tx: &Transaction,
    index: usize,
    amount: Amount,
    prevouts: Option<&[TxOut]>,
) -> Result<Vec<SignatureVerification>> {
    verify_signature(tx, index, amount, &VerificationSettings::default(), prevouts)
}

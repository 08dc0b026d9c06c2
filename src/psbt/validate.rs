//! Checking the signatures an input carries.

use crate::bitcoin::bip32::Xpub;
use crate::bitcoin::psbt::Psbt;
use crate::bitcoin::secp256k1::{Message, Secp256k1};
use crate::bitcoin::taproot::TapLeafHash;
use crate::bitcoin::{CompressedPublicKey, Script, Witness};
use crate::error::{Error, Result};
use crate::musig2::parse_musig2_partial_sigs;
use crate::script_pattern::parse_signature_script;
use crate::verify::{verify_signature, SignatureVerification, VerificationSettings};

use super::derivation::derive_pubkey_from_input;
use super::finalize::is_finalized;
use super::sighash::{collect_prevouts, spent_output, taproot_sighash};
use super::sign::ecdsa_message;
use super::{musig2_input, SpendKind};

fn validate_legacy(
    psbt: &Psbt,
    index: usize,
    kind: SpendKind,
    pubkey: Option<&CompressedPublicKey>,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let signatures: Vec<_> = psbt.inputs[index]
        .partial_sigs
        .iter()
        .filter(|(key, _)| pubkey.map_or(true, |p| key.inner == p.0))
        .collect();
    if signatures.is_empty() {
        return Ok(false);
    }
    for (key, signature) in signatures {
        let message = ecdsa_message(psbt, index, kind, signature.sighash_type)?;
        if secp
            .verify_ecdsa(&message, &signature.signature, &key.inner)
            .is_err()
        {
            return Ok(false);
        }
    }
    Ok(true)
}

fn validate_taproot_single_key(
    psbt: &Psbt,
    index: usize,
    pubkey: Option<&CompressedPublicKey>,
) -> Result<bool> {
    let secp = Secp256k1::verification_only();
    let input = &psbt.inputs[index];
    let xonly = pubkey.map(|p| p.0.x_only_public_key().0);

    let script_sigs: Vec<_> = input
        .tap_script_sigs
        .iter()
        .filter(|((key, _), _)| xonly.map_or(true, |x| *key == x))
        .collect();
    let key_sig = input.tap_key_sig.filter(|_| match (xonly, input.tap_internal_key) {
        (None, _) => true,
        (Some(x), Some(internal)) => x == internal,
        (Some(_), None) => false,
    });
    if script_sigs.is_empty() && key_sig.is_none() {
        return Ok(false);
    }

    let prevouts = collect_prevouts(psbt)?;
    for ((key, leaf_hash), signature) in script_sigs {
        let known_leaf = input
            .tap_scripts
            .values()
            .any(|(script, version)| TapLeafHash::from_script(script, *version) == *leaf_hash);
        if !known_leaf {
            return Err(Error::validation(format!(
                "signature by {} commits to a leaf the input does not reveal",
                key
            )));
        }
        let message = taproot_sighash(
            &psbt.unsigned_tx,
            index,
            &prevouts,
            Some(*leaf_hash),
            signature.sighash_type,
        )?;
        if secp
            .verify_schnorr(&signature.signature, &Message::from_digest(message), key)
            .is_err()
        {
            return Ok(false);
        }
    }
    if let Some(signature) = key_sig {
        let output_key = output_key(&prevouts[index].script_pubkey)?;
        let message = taproot_sighash(
            &psbt.unsigned_tx,
            index,
            &prevouts,
            None,
            signature.sighash_type,
        )?;
        if secp
            .verify_schnorr(&signature.signature, &Message::from_digest(message), &output_key)
            .is_err()
        {
            return Ok(false);
        }
    }
    Ok(true)
}

fn output_key(script_pubkey: &Script) -> Result<crate::bitcoin::XOnlyPublicKey> {
    if !script_pubkey.is_p2tr() {
        return Err(Error::validation("spent output is not a taproot output"));
    }
    crate::bitcoin::XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34])
        .map_err(|e| Error::validation(format!("invalid output key: {}", e)))
}

/// Input `index` with its final script_sig and witness, as it would appear on chain.
fn finalized_spend(psbt: &Psbt, index: usize) -> crate::bitcoin::Transaction {
    let mut tx = psbt.unsigned_tx.clone();
    let input = &psbt.inputs[index];
    tx.input[index].script_sig = input.final_script_sig.clone().unwrap_or_default();
    tx.input[index].witness = input.final_script_witness.clone().unwrap_or_default();
    tx
}

fn validate_finalized(
    psbt: &Psbt,
    index: usize,
    pubkey: Option<&CompressedPublicKey>,
) -> Result<bool> {
    let tx = finalized_spend(psbt, index);
    let amount = spent_output(psbt, index)?.value;
    let prevouts = collect_prevouts(psbt)?;
    let settings = VerificationSettings {
        public_key: pubkey.map(|p| p.to_bytes().to_vec()),
        signature_index: None,
    };
    let verifications = verify_signature(&tx, index, amount, &settings, Some(&prevouts))?;
    let matched = verifications
        .iter()
        .filter(|v| matches!(v, SignatureVerification::Matched { .. }))
        .count();
    Ok(match pubkey {
        Some(_) => matched > 0,
        None => matched > 0 && matched == verifications.len(),
    })
}

/// Whether the signatures on input `index` (restricted to `pubkey` when given) are valid.
///
/// Missing signatures are `false`; malformed data is an error.
pub(crate) fn validate_signatures_of_input(
    psbt: &Psbt,
    index: usize,
    kind: Option<SpendKind>,
    pubkey: Option<&CompressedPublicKey>,
) -> Result<bool> {
    if is_finalized(psbt, index) {
        return validate_finalized(psbt, index, pubkey);
    }
    let kind = kind.ok_or_else(|| Error::state("input is not classified"))?;
    match kind {
        SpendKind::TaprootKeyPath => musig2_input::validate(psbt, index, pubkey),
        SpendKind::TaprootScriptPath | SpendKind::TaprootGeneric => {
            validate_taproot_single_key(psbt, index, pubkey)
        }
        SpendKind::P2sh | SpendKind::P2shP2wsh | SpendKind::P2wsh | SpendKind::P2shP2pk => {
            validate_legacy(psbt, index, kind, pubkey)
        }
    }
}

/// Number of signatures on input `index`, without verifying any of them.
///
/// Finalized inputs are counted from their final scripts, others from their signature
/// fields (each MuSig2 partial signature counts once).
pub(crate) fn signature_count(psbt: &Psbt, index: usize) -> Result<usize> {
    let input = &psbt.inputs[index];
    if is_finalized(psbt, index) {
        let script_sig = input.final_script_sig.clone().unwrap_or_default();
        let witness = input.final_script_witness.clone().unwrap_or_else(Witness::new);
        let descriptor = parse_signature_script(&script_sig, &witness)?;
        return Ok(descriptor
            .signatures()
            .iter()
            .filter(|s| !s.is_placeholder())
            .count());
    }
    Ok(input.partial_sigs.len()
        + input.tap_script_sigs.len()
        + usize::from(input.tap_key_sig.is_some())
        + parse_musig2_partial_sigs(input)?.len())
}

/// One flag per candidate root key: did that key sign input `index`?
pub(crate) fn get_signature_validation_array(
    psbt: &Psbt,
    index: usize,
    kind: Option<SpendKind>,
    root_keys: &[Xpub],
) -> Result<[bool; 3]> {
    if root_keys.len() > 3 {
        return Err(Error::validation(format!(
            "expected at most 3 root keys, got {}",
            root_keys.len()
        )));
    }
    let mut result = [false; 3];
    if signature_count(psbt, index)? == 0 {
        return Ok(result);
    }
    let secp = Secp256k1::verification_only();
    for (slot, xpub) in result.iter_mut().zip(root_keys) {
        if let Some(pubkey) = derive_pubkey_from_input(&secp, xpub, &psbt.inputs[index])? {
            *slot = validate_signatures_of_input(psbt, index, kind, Some(&pubkey))?;
        }
    }
    Ok(result)
}

//! Sighash types allowed for signing and the digests signatures commit to.

use crate::bitcoin::hashes::Hash;
use crate::bitcoin::psbt::{Input, Psbt};
use crate::bitcoin::secp256k1::Message;
use crate::bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use crate::bitcoin::taproot::TapLeafHash;
use crate::bitcoin::{Amount, Script, Transaction, TxOut};
use crate::error::{Error, Result};

/// Sighash types a signer is willing to sign with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SighashPolicy {
    pub taproot: Vec<TapSighashType>,
    pub legacy: Vec<EcdsaSighashType>,
}

impl Default for SighashPolicy {
    fn default() -> Self {
        SighashPolicy {
            taproot: vec![TapSighashType::Default, TapSighashType::All],
            legacy: vec![EcdsaSighashType::All],
        }
    }
}

impl SighashPolicy {
    /// Effective taproot sighash of `input`, if allowed.
    pub fn check_taproot(&self, input: &Input) -> Result<TapSighashType> {
        let sighash = taproot_sighash_type(input)?;
        if !self.taproot.contains(&sighash) {
            return Err(Error::validation(format!(
                "sighash type {} is not allowed",
                sighash
            )));
        }
        Ok(sighash)
    }

    /// Effective ECDSA sighash of `input`, if allowed.
    pub fn check_legacy(&self, input: &Input) -> Result<EcdsaSighashType> {
        let sighash = ecdsa_sighash_type(input)?;
        if !self.legacy.contains(&sighash) {
            return Err(Error::validation(format!(
                "sighash type {} is not allowed",
                sighash
            )));
        }
        Ok(sighash)
    }
}

/// The input's `sighash_type`, or `SIGHASH_DEFAULT` when unset.
pub fn taproot_sighash_type(input: &Input) -> Result<TapSighashType> {
    match input.sighash_type {
        None => Ok(TapSighashType::Default),
        Some(ty) => ty
            .taproot_hash_ty()
            .map_err(|e| Error::validation(format!("invalid taproot sighash type: {}", e))),
    }
}

/// The input's `sighash_type`, or `SIGHASH_ALL` when unset.
pub fn ecdsa_sighash_type(input: &Input) -> Result<EcdsaSighashType> {
    match input.sighash_type {
        None => Ok(EcdsaSighashType::All),
        Some(ty) => ty
            .ecdsa_hash_ty()
            .map_err(|e| Error::validation(format!("invalid ecdsa sighash type: {}", e))),
    }
}

/// Output spent by input `index`, from `witness_utxo` or the full previous transaction.
pub fn spent_output(psbt: &Psbt, index: usize) -> Result<TxOut> {
    let input = &psbt.inputs[index];
    if let Some(utxo) = &input.witness_utxo {
        return Ok(utxo.clone());
    }
    let prev_tx = input
        .non_witness_utxo
        .as_ref()
        .ok_or_else(|| Error::validation("input has neither witness_utxo nor non_witness_utxo"))?;
    let outpoint = psbt.unsigned_tx.input[index].previous_output;
    if prev_tx.compute_txid() != outpoint.txid {
        return Err(Error::validation(
            "non_witness_utxo does not match the previous output txid",
        ));
    }
    prev_tx
        .output
        .get(outpoint.vout as usize)
        .cloned()
        .ok_or_else(|| Error::validation(format!("previous output {} does not exist", outpoint)))
}

/// Every spent output, in input order. Taproot digests commit to all of them.
pub fn collect_prevouts(psbt: &Psbt) -> Result<Vec<TxOut>> {
    (0..psbt.inputs.len())
        .map(|i| spent_output(psbt, i).map_err(|e| e.at_input(i)))
        .collect()
}

/// Pre-segwit digest over `script_code`.
pub fn legacy_sighash(
    tx: &Transaction,
    index: usize,
    script_code: &Script,
    sighash_type: u32,
) -> Result<Message> {
    let hash = SighashCache::new(tx)
        .legacy_signature_hash(index, script_code, sighash_type)
        .map_err(|e| Error::Sighash(e.to_string()))?;
    Ok(Message::from_digest(hash.to_byte_array()))
}

/// BIP143 digest for a p2wsh or p2sh-p2wsh spend.
pub fn segwit_v0_sighash(
    tx: &Transaction,
    index: usize,
    witness_script: &Script,
    amount: Amount,
    sighash_type: EcdsaSighashType,
) -> Result<Message> {
    let hash = SighashCache::new(tx)
        .p2wsh_signature_hash(index, witness_script, amount, sighash_type)
        .map_err(|e| Error::Sighash(e.to_string()))?;
    Ok(Message::from_digest(hash.to_byte_array()))
}

/// BIP341 digest. `leaf_hash` selects a script-path spend.
pub fn taproot_sighash(
    tx: &Transaction,
    index: usize,
    prevouts: &[TxOut],
    leaf_hash: Option<TapLeafHash>,
    sighash_type: TapSighashType,
) -> Result<[u8; 32]> {
    if prevouts.len() != tx.input.len() {
        return Err(Error::validation(format!(
            "taproot sighash needs all {} prevouts, got {}",
            tx.input.len(),
            prevouts.len()
        )));
    }
    let prevouts = Prevouts::All(prevouts);
    let mut cache = SighashCache::new(tx);
    let hash = match leaf_hash {
        Some(leaf_hash) => {
            cache.taproot_script_spend_signature_hash(index, &prevouts, leaf_hash, sighash_type)
        }
        None => cache.taproot_key_spend_signature_hash(index, &prevouts, sighash_type),
    }
    .map_err(|e| Error::Sighash(e.to_string()))?;
    Ok(hash.to_byte_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::psbt::PsbtSighashType;
    use crate::test_utils::{build_psbt, InputShape};

    #[test]
    fn test_effective_sighash_defaults() {
        let input = Input::default();
        assert_eq!(taproot_sighash_type(&input).unwrap(), TapSighashType::Default);
        assert_eq!(ecdsa_sighash_type(&input).unwrap(), EcdsaSighashType::All);

        let policy = SighashPolicy::default();
        assert!(policy.check_taproot(&input).is_ok());
        assert!(policy.check_legacy(&input).is_ok());
    }

    #[test]
    fn test_policy_rejects_disallowed_sighash() {
        let input = Input {
            sighash_type: Some(PsbtSighashType::from(EcdsaSighashType::None)),
            ..Default::default()
        };
        let err = SighashPolicy::default().check_legacy(&input).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);

        let input = Input {
            sighash_type: Some(PsbtSighashType::from(TapSighashType::SinglePlusAnyoneCanPay)),
            ..Default::default()
        };
        assert!(SighashPolicy::default().check_taproot(&input).is_err());
        let policy = SighashPolicy {
            taproot: vec![TapSighashType::SinglePlusAnyoneCanPay],
            legacy: vec![],
        };
        assert_eq!(
            policy.check_taproot(&input).unwrap(),
            TapSighashType::SinglePlusAnyoneCanPay
        );
    }

    #[test]
    fn test_collect_prevouts_uses_either_utxo_field() {
        let fixture = build_psbt(&[InputShape::P2sh, InputShape::P2wsh]);
        assert!(fixture.psbt.inputs[0].witness_utxo.is_none());
        let prevouts = collect_prevouts(&fixture.psbt).unwrap();
        assert_eq!(prevouts.len(), 2);
        assert!(prevouts[0].script_pubkey.is_p2sh());
        assert!(prevouts[1].script_pubkey.is_p2wsh());
    }

    #[test]
    fn test_taproot_sighash_requires_every_prevout() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath, InputShape::P2wsh]);
        let prevouts = collect_prevouts(&fixture.psbt).unwrap();
        let tx = &fixture.psbt.unsigned_tx;
        assert!(taproot_sighash(tx, 0, &prevouts, None, TapSighashType::Default).is_ok());
        let err = taproot_sighash(tx, 0, &prevouts[..1], None, TapSighashType::Default).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }
}

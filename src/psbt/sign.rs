//! ECDSA and single-key Schnorr signing of legacy and taproot inputs.

use crate::bitcoin::psbt::Psbt;
use crate::bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use crate::bitcoin::sighash::{EcdsaSighashType, TapSighashType};
use crate::bitcoin::taproot::{self, TapLeafHash};
use crate::bitcoin::{ecdsa, hashes::Hash, CompressedPublicKey, PublicKey, Script, ScriptBuf};
use crate::error::{Error, Result};
use crate::fixed_script_wallet::parse_multisig_script_2_of_3;
use crate::musig2::is_musig2_input;
use crate::script_pattern::{decompile, ScriptElement};
use crate::taproot::tap_tweak_privkey;

use super::sighash::{
    collect_prevouts, legacy_sighash, segwit_v0_sighash, spent_output, taproot_sighash,
};
use super::SpendKind;

/// Script the signature commits to: the witness script for segwit spends, otherwise the
/// redeem script.
pub(crate) fn script_code(psbt: &Psbt, index: usize, kind: SpendKind) -> Result<&ScriptBuf> {
    let input = &psbt.inputs[index];
    let script = if kind.is_segwit_v0() {
        input.witness_script.as_ref()
    } else {
        input.redeem_script.as_ref()
    };
    script.ok_or_else(|| Error::validation(format!("{} input is missing its script", kind)))
}

/// ECDSA digest of a legacy input.
pub(crate) fn ecdsa_message(
    psbt: &Psbt,
    index: usize,
    kind: SpendKind,
    sighash_type: EcdsaSighashType,
) -> Result<Message> {
    let script = script_code(psbt, index, kind)?;
    if kind.is_segwit_v0() {
        let amount = spent_output(psbt, index)?.value;
        segwit_v0_sighash(&psbt.unsigned_tx, index, script, amount, sighash_type)
    } else {
        legacy_sighash(&psbt.unsigned_tx, index, script, sighash_type.to_u32())
    }
}

/// Keys the script at `script` lets sign, in script order.
pub(crate) fn script_signers(kind: SpendKind, script: &Script) -> Result<Vec<CompressedPublicKey>> {
    match kind {
        SpendKind::P2shP2pk => {
            let key = CompressedPublicKey::from_slice(&script.as_bytes()[1..34])
                .map_err(|e| Error::validation(format!("invalid p2pk key: {}", e)))?;
            Ok(vec![key])
        }
        _ => Ok(parse_multisig_script_2_of_3(script)?.to_vec()),
    }
}

/// Sign a p2sh, p2sh-p2wsh, p2wsh or p2sh-p2pk input.
pub(crate) fn sign_legacy_input(
    psbt: &mut Psbt,
    index: usize,
    kind: SpendKind,
    secret: &SecretKey,
    sighash_type: EcdsaSighashType,
) -> Result<()> {
    let secp = Secp256k1::new();
    let pubkey = CompressedPublicKey(secret.public_key(&secp));
    if !script_signers(kind, script_code(psbt, index, kind)?)?.contains(&pubkey) {
        return Err(Error::validation(format!(
            "key {} is not a signer of this input",
            pubkey
        )));
    }
    let key = PublicKey::from(pubkey);
    let partial_sigs = &psbt.inputs[index].partial_sigs;
    if partial_sigs.contains_key(&key) {
        return Err(Error::state(format!("input is already signed by {}", pubkey)));
    }
    if partial_sigs.len() >= 2 {
        return Err(Error::state("input already has two signatures"));
    }
    let message = ecdsa_message(psbt, index, kind, sighash_type)?;
    let signature = ecdsa::Signature {
        signature: secp.sign_ecdsa(&message, secret),
        sighash_type,
    };
    psbt.inputs[index].partial_sigs.insert(key, signature);
    Ok(())
}

/// X-only keys pushed by a leaf script, in script order.
pub(crate) fn leaf_keys(script: &Script) -> Result<Vec<XOnlyPublicKey>> {
    let elements =
        decompile(script).ok_or_else(|| Error::validation("leaf script does not decompile"))?;
    elements
        .iter()
        .filter_map(|element| match element {
            ScriptElement::Push(data) if data.len() == 32 => Some(data),
            _ => None,
        })
        .map(|data| {
            XOnlyPublicKey::from_slice(data)
                .map_err(|e| Error::validation(format!("invalid leaf key: {}", e)))
        })
        .collect()
}

/// The single leaf of a script-path input.
pub(crate) fn single_leaf(psbt: &Psbt, index: usize) -> Result<(&taproot::ControlBlock, &ScriptBuf, TapLeafHash)> {
    let input = &psbt.inputs[index];
    if input.tap_scripts.len() != 1 {
        return Err(Error::validation(format!(
            "expected exactly one leaf script, got {}",
            input.tap_scripts.len()
        )));
    }
    let (control_block, (script, leaf_version)) = input
        .tap_scripts
        .iter()
        .next()
        .ok_or_else(|| Error::IllegalState("leaf script disappeared".to_string()))?;
    Ok((
        control_block,
        script,
        TapLeafHash::from_script(script, *leaf_version),
    ))
}

fn schnorr_sign(message: [u8; 32], secret: &SecretKey) -> crate::bitcoin::secp256k1::schnorr::Signature {
    let secp = Secp256k1::signing_only();
    let keypair = Keypair::from_secret_key(&secp, secret);
    secp.sign_schnorr_no_aux_rand(&Message::from_digest(message), &keypair)
}

/// Sign the revealed leaf of a script-path input.
pub(crate) fn sign_taproot_script_path(
    psbt: &mut Psbt,
    index: usize,
    secret: &SecretKey,
    sighash_type: TapSighashType,
) -> Result<()> {
    let secp = Secp256k1::signing_only();
    let (xonly, _) = secret.x_only_public_key(&secp);
    let (_, script, leaf_hash) = single_leaf(psbt, index)?;
    if !leaf_keys(script)?.contains(&xonly) {
        return Err(Error::validation(format!(
            "key {} is not in the leaf script",
            xonly
        )));
    }
    if psbt.inputs[index]
        .tap_script_sigs
        .contains_key(&(xonly, leaf_hash))
    {
        return Err(Error::state(format!("leaf is already signed by {}", xonly)));
    }

    let prevouts = collect_prevouts(psbt)?;
    let message = taproot_sighash(
        &psbt.unsigned_tx,
        index,
        &prevouts,
        Some(leaf_hash),
        sighash_type,
    )?;
    let signature = taproot::Signature {
        signature: schnorr_sign(message, secret),
        sighash_type,
    };
    psbt.inputs[index]
        .tap_script_sigs
        .insert((xonly, leaf_hash), signature);
    Ok(())
}

/// Key-path signature by the sole owner of the internal key.
pub(crate) fn sign_taproot_key_path_single(
    psbt: &mut Psbt,
    index: usize,
    secret: &SecretKey,
    sighash_type: TapSighashType,
) -> Result<()> {
    let secp = Secp256k1::signing_only();
    let input = &psbt.inputs[index];
    if is_musig2_input(input) {
        return Err(Error::state("input is spent with a MuSig2 session"));
    }
    if !input.tap_scripts.is_empty() {
        return Err(Error::state(
            "input reveals more than one leaf script; cannot choose a spend path",
        ));
    }
    let internal_key = input
        .tap_internal_key
        .ok_or_else(|| Error::validation("taproot input is missing tap_internal_key"))?;
    if secret.x_only_public_key(&secp).0 != internal_key {
        return Err(Error::validation("key is not the input's internal key"));
    }
    if input.tap_key_sig.is_some() {
        return Err(Error::state("input already has a key-path signature"));
    }
    let merkle_root = input.tap_merkle_root.map(|root| root.to_byte_array());
    let tweaked = tap_tweak_privkey(secret, merkle_root.as_ref())?;

    let prevouts = collect_prevouts(psbt)?;
    let message = taproot_sighash(&psbt.unsigned_tx, index, &prevouts, None, sighash_type)?;
    psbt.inputs[index].tap_key_sig = Some(taproot::Signature {
        signature: schnorr_sign(message, &tweaked),
        sighash_type,
    });
    Ok(())
}

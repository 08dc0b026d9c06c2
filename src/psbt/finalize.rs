use miniscript::psbt::PsbtExt;

use crate::bitcoin::psbt::Psbt;
use crate::bitcoin::secp256k1::Secp256k1;
use crate::bitcoin::Witness;
use crate::error::{Error, Result};

use super::propkv::remove_musig2_keys;
use super::sign::{leaf_keys, single_leaf};
use super::{musig2_input, SpendKind};

pub(crate) fn is_finalized(psbt: &Psbt, index: usize) -> bool {
    let input = &psbt.inputs[index];
    input.final_script_sig.is_some() || input.final_script_witness.is_some()
}

/// Witness of a script-path spend.
///
/// Each leaf key's signature is put in front of the previous one, so the stack reads
/// `[sig_for_last_key, ..., sig_for_first_key, leaf_script, control_block]`.
fn script_path_witness(psbt: &Psbt, index: usize) -> Result<Witness> {
    let input = &psbt.inputs[index];
    let (control_block, script, leaf_hash) = single_leaf(psbt, index)?;
    let mut items: Vec<Vec<u8>> = vec![script.to_bytes(), control_block.serialize()];
    for key in leaf_keys(script)? {
        let signature = input
            .tap_script_sigs
            .get(&(key, leaf_hash))
            .ok_or_else(|| Error::validation(format!("missing leaf signature for {}", key)))?;
        items.insert(0, signature.to_vec());
    }
    Ok(Witness::from_slice(&items))
}

/// Finalize one input according to its spend kind.
///
/// MuSig2 records are dropped afterwards; leaf signatures stay on the input.
pub(crate) fn finalize_input(psbt: &mut Psbt, index: usize, kind: SpendKind) -> Result<()> {
    match kind {
        SpendKind::TaprootScriptPath => {
            let witness = script_path_witness(psbt, index)?;
            psbt.inputs[index].final_script_witness = Some(witness);
        }
        SpendKind::TaprootKeyPath => {
            let signature = musig2_input::aggregate(psbt, index)?;
            let input = &mut psbt.inputs[index];
            input.tap_key_sig = Some(signature);
            input.final_script_witness = Some(Witness::from_slice(&[signature.to_vec()]));
        }
        SpendKind::TaprootGeneric => {
            let input = &mut psbt.inputs[index];
            let signature = input.tap_key_sig.ok_or_else(|| {
                Error::state("taproot input has neither a single leaf nor a key-path signature")
            })?;
            input.final_script_witness = Some(Witness::from_slice(&[signature.to_vec()]));
        }
        SpendKind::P2sh | SpendKind::P2shP2wsh | SpendKind::P2wsh | SpendKind::P2shP2pk => {
            let secp = Secp256k1::verification_only();
            psbt.finalize_inp_mut(&secp, index)
                .map_err(|e| Error::validation(format!("could not finalize: {}", e)))?;
        }
    }
    remove_musig2_keys(&mut psbt.inputs[index].proprietary);
    Ok(())
}

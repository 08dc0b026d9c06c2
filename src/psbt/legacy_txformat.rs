//! Half-signed transactions in the pre-PSBT wire format.
//!
//! Each 2-of-3 input carries its signatures at the position of their key in the multisig
//! script, with `OP_0` standing in for the keys that have not signed. The result parses
//! back through [`crate::script_pattern::parse_signature_script`].

use crate::bitcoin::blockdata::opcodes::all::OP_PUSHBYTES_0;
use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::psbt::{Input, Psbt};
use crate::bitcoin::script::PushBytesBuf;
use crate::bitcoin::{ScriptBuf, Transaction, Witness};
use crate::error::{Error, Result};
use crate::fixed_script_wallet::parse_multisig_script_2_of_3;
use crate::script_pattern::SignatureSlot;

fn push_bytes(bytes: Vec<u8>) -> Result<PushBytesBuf> {
    PushBytesBuf::try_from(bytes).map_err(|e| Error::validation(format!("push too large: {}", e)))
}

/// Signature slots in key order, placeholders for keys that have not signed.
fn signature_slots(input: &Input, multisig_script: &ScriptBuf) -> Result<Vec<SignatureSlot>> {
    if !(1..=2).contains(&input.partial_sigs.len()) {
        return Err(Error::validation(format!(
            "expected 1 or 2 partial signatures, got {}",
            input.partial_sigs.len()
        )));
    }
    let keys = parse_multisig_script_2_of_3(multisig_script)?;
    let mut slots = vec![SignatureSlot::Placeholder; 3];
    for (pubkey, signature) in &input.partial_sigs {
        let position = keys
            .iter()
            .position(|key| key.to_bytes() == pubkey.to_bytes()[..])
            .ok_or_else(|| Error::validation("signature key is not in the multisig script"))?;
        slots[position] = SignatureSlot::Signature(signature.to_vec());
    }
    Ok(slots)
}

fn half_sign_input(tx: &mut Transaction, index: usize, input: &Input) -> Result<()> {
    if !input.tap_script_sigs.is_empty() || !input.tap_key_origins.is_empty() {
        return Err(Error::validation(
            "taproot inputs have no half-signed legacy encoding",
        ));
    }
    match (&input.witness_script, &input.redeem_script) {
        (Some(witness_script), redeem_script) => {
            let slots = signature_slots(input, witness_script)?;
            let mut items: Vec<Vec<u8>> = vec![vec![]];
            items.extend(slots.iter().map(SignatureSlot::to_push));
            items.push(witness_script.to_bytes());
            tx.input[index].witness = Witness::from_slice(&items);
            if let Some(redeem_script) = redeem_script {
                tx.input[index].script_sig = Builder::new()
                    .push_slice(push_bytes(redeem_script.to_bytes())?)
                    .into_script();
            }
        }
        (None, Some(redeem_script)) => {
            let slots = signature_slots(input, redeem_script)?;
            let mut builder = Builder::new().push_opcode(OP_PUSHBYTES_0);
            for slot in &slots {
                builder = match slot.as_bytes() {
                    Some(signature) => builder.push_slice(push_bytes(signature.to_vec())?),
                    None => builder.push_opcode(OP_PUSHBYTES_0),
                };
            }
            tx.input[index].script_sig = builder
                .push_slice(push_bytes(redeem_script.to_bytes())?)
                .into_script();
        }
        (None, None) => {
            return Err(Error::validation(
                "only 2-of-3 multisig inputs have a half-signed legacy encoding",
            ))
        }
    }
    Ok(())
}

/// Transaction with each input's signatures placed in its script_sig or witness.
pub(crate) fn build_half_signed_legacy_tx(psbt: &Psbt) -> Result<Transaction> {
    if psbt.inputs.is_empty() || psbt.unsigned_tx.output.is_empty() {
        return Err(Error::validation("transaction has no inputs or no outputs"));
    }
    let mut tx = psbt.unsigned_tx.clone();
    for (index, input) in psbt.inputs.iter().enumerate() {
        half_sign_input(&mut tx, index, input).map_err(|e| e.at_input(index))?;
    }
    Ok(tx)
}

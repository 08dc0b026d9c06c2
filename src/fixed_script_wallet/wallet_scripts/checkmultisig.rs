use crate::bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2, OP_PUSHNUM_3};
use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::{CompressedPublicKey, Script, ScriptBuf};
use crate::error::{Error, Result};
use crate::fixed_script_wallet::wallet_keys::PubTriple;
use crate::script_pattern::{decompile, match_script, multisig_pattern, Capture};

/// `OP_2 <user> <backup> <bitgo> OP_3 OP_CHECKMULTISIG`
pub fn build_multisig_script_2_of_3(keys: &PubTriple) -> ScriptBuf {
    let mut builder = Builder::new().push_opcode(OP_PUSHNUM_2);
    for key in keys {
        builder = builder.push_slice(key.to_bytes());
    }
    builder
        .push_opcode(OP_PUSHNUM_3)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Inverse of [`build_multisig_script_2_of_3`]. Only compressed keys are accepted.
pub fn parse_multisig_script_2_of_3(script: &Script) -> Result<PubTriple> {
    let elements =
        decompile(script).ok_or_else(|| Error::validation("multisig script does not decompile"))?;
    let captures = match_script(&elements, &multisig_pattern())
        .map_err(|e| Error::validation(format!("not a 2-of-3 multisig script: {}", e)))?;
    let keys = captures
        .into_iter()
        .map(|capture| match capture {
            Capture::PubKey(bytes) => CompressedPublicKey::from_slice(&bytes)
                .map_err(|e| Error::validation(format!("invalid multisig key: {}", e))),
            other => Err(Error::IllegalState(format!(
                "unexpected capture {:?} in multisig script",
                other
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    keys.try_into()
        .map_err(|_| Error::IllegalState("multisig script did not yield three keys".to_string()))
}

#[derive(Debug, Clone)]
pub struct ScriptP2sh {
    pub redeem_script: ScriptBuf,
}

#[derive(Debug, Clone)]
pub struct ScriptP2shP2wsh {
    pub redeem_script: ScriptBuf,
    pub witness_script: ScriptBuf,
}

#[derive(Debug, Clone)]
pub struct ScriptP2wsh {
    pub witness_script: ScriptBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_script_wallet::wallet_keys::tests::get_test_wallet_keys;
    use crate::fixed_script_wallet::wallet_keys::to_pub_triple;

    #[test]
    fn test_build_and_parse() {
        let keys = to_pub_triple(&get_test_wallet_keys("test").xpubs);
        let script = build_multisig_script_2_of_3(&keys);
        assert_eq!(script.len(), 1 + 3 * 34 + 2);
        assert_eq!(parse_multisig_script_2_of_3(&script).unwrap(), keys);
    }

    #[test]
    fn test_parse_rejects_other_scripts() {
        let keys = to_pub_triple(&get_test_wallet_keys("test").xpubs);
        let script = build_multisig_script_2_of_3(&keys);
        let truncated = ScriptBuf::from_bytes(script.as_bytes()[..script.len() - 1].to_vec());
        assert!(parse_multisig_script_2_of_3(&truncated).is_err());
        assert!(parse_multisig_script_2_of_3(&script.to_p2wsh()).is_err());
    }
}

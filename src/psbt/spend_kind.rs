use std::fmt;

use crate::bitcoin::blockdata::opcodes::all::OP_CHECKSIG;
use crate::bitcoin::psbt::Input;
use crate::bitcoin::Script;
use crate::error::{Error, Result};
use crate::fixed_script_wallet::parse_multisig_script_2_of_3;
use crate::musig2::is_musig2_input;

/// How an input is spent, derived from which fields it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpendKind {
    /// MuSig2 aggregate signature for the tweaked internal key.
    TaprootKeyPath,
    /// A single revealed leaf.
    TaprootScriptPath,
    /// Carries taproot fields but fits neither of the shapes above.
    TaprootGeneric,
    P2sh,
    P2shP2wsh,
    P2wsh,
    /// `<pubkey> OP_CHECKSIG` wrapped in p2sh.
    P2shP2pk,
}

impl SpendKind {
    pub fn is_taproot(&self) -> bool {
        matches!(
            self,
            SpendKind::TaprootKeyPath | SpendKind::TaprootScriptPath | SpendKind::TaprootGeneric
        )
    }

    pub fn is_segwit_v0(&self) -> bool {
        matches!(self, SpendKind::P2shP2wsh | SpendKind::P2wsh)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpendKind::TaprootKeyPath => "taprootKeyPath",
            SpendKind::TaprootScriptPath => "taprootScriptPath",
            SpendKind::TaprootGeneric => "taproot",
            SpendKind::P2sh => "p2sh",
            SpendKind::P2shP2wsh => "p2shP2wsh",
            SpendKind::P2wsh => "p2wsh",
            SpendKind::P2shP2pk => "p2shP2pk",
        }
    }
}

impl fmt::Display for SpendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn has_taproot_fields(input: &Input) -> bool {
    input.tap_internal_key.is_some()
        || input.tap_merkle_root.is_some()
        || input.tap_key_sig.is_some()
        || !input.tap_scripts.is_empty()
        || !input.tap_script_sigs.is_empty()
        || !input.tap_key_origins.is_empty()
        || is_musig2_input(input)
}

fn is_p2pk_script(script: &Script) -> bool {
    let bytes = script.as_bytes();
    bytes.len() == 35 && bytes[0] == 33 && bytes[34] == OP_CHECKSIG.to_u8()
}

/// Classify `input`. Nothing is cached: callers classify again whenever they need to.
///
/// `prevout_script` is consulted only when the input carries no other hint, to tell an
/// unannotated taproot input from an unannotated legacy one.
pub fn classify(input: &Input, prevout_script: Option<&Script>) -> Result<SpendKind> {
    let has_leaf_derivation = input
        .tap_key_origins
        .values()
        .any(|(leaf_hashes, _)| !leaf_hashes.is_empty());

    if input.tap_internal_key.is_some()
        && input.tap_merkle_root.is_some()
        && input.tap_scripts.is_empty()
        && input.tap_script_sigs.is_empty()
        && !has_leaf_derivation
    {
        return Ok(SpendKind::TaprootKeyPath);
    }
    if input.tap_scripts.len() == 1 && !is_musig2_input(input) {
        return Ok(SpendKind::TaprootScriptPath);
    }
    if has_taproot_fields(input) || prevout_script.is_some_and(|s| s.is_p2tr()) {
        return Ok(SpendKind::TaprootGeneric);
    }

    match (&input.redeem_script, &input.witness_script) {
        (Some(_), Some(_)) => Ok(SpendKind::P2shP2wsh),
        (None, Some(_)) => Ok(SpendKind::P2wsh),
        (Some(redeem_script), None) if is_p2pk_script(redeem_script) => Ok(SpendKind::P2shP2pk),
        (Some(redeem_script), None) => {
            parse_multisig_script_2_of_3(redeem_script)?;
            Ok(SpendKind::P2sh)
        }
        (None, None) => Err(Error::state(
            "cannot classify input without redeem script, witness script or taproot fields",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::hashes::Hash;
    use crate::bitcoin::taproot::{TapLeafHash, TapNodeHash};
    use crate::bitcoin::ScriptBuf;
    use crate::test_utils::{build_psbt, InputShape};
    use rstest::rstest;

    #[rstest]
    #[case(InputShape::P2sh, SpendKind::P2sh)]
    #[case(InputShape::P2shP2wsh, SpendKind::P2shP2wsh)]
    #[case(InputShape::P2wsh, SpendKind::P2wsh)]
    #[case(InputShape::P2shP2pk, SpendKind::P2shP2pk)]
    #[case(InputShape::P2trLegacyScriptPath, SpendKind::TaprootScriptPath)]
    #[case(InputShape::P2trMusig2ScriptPath, SpendKind::TaprootScriptPath)]
    #[case(InputShape::P2trMusig2KeyPath, SpendKind::TaprootKeyPath)]
    fn test_classify_fixture_inputs(#[case] shape: InputShape, #[case] expected: SpendKind) {
        let fixture = build_psbt(&[shape]);
        let input = &fixture.psbt.inputs[0];
        assert_eq!(classify(input, None).unwrap(), expected);
    }

    #[test]
    fn test_leaf_derivation_excludes_key_path() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let mut input = fixture.psbt.inputs[0].clone();
        let (_, (leaf_hashes, _)) = input.tap_key_origins.iter_mut().next().unwrap();
        leaf_hashes.push(TapLeafHash::all_zeros());
        assert_eq!(classify(&input, None).unwrap(), SpendKind::TaprootGeneric);
    }

    #[test]
    fn test_musig2_fields_exclude_script_path() {
        let key_path = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let script_path = build_psbt(&[InputShape::P2trMusig2ScriptPath]);
        let mut input = script_path.psbt.inputs[0].clone();
        input.proprietary = key_path.psbt.inputs[0].proprietary.clone();
        assert_eq!(classify(&input, None).unwrap(), SpendKind::TaprootGeneric);
    }

    #[test]
    fn test_internal_key_without_root_is_generic() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let mut input = fixture.psbt.inputs[0].clone();
        input.tap_merkle_root = None;
        assert_eq!(classify(&input, None).unwrap(), SpendKind::TaprootGeneric);
        input.tap_merkle_root = Some(TapNodeHash::all_zeros());
        assert_eq!(classify(&input, None).unwrap(), SpendKind::TaprootKeyPath);
    }

    #[test]
    fn test_unannotated_inputs() {
        let input = Input::default();
        assert_eq!(classify(&input, None).unwrap_err().kind(), crate::ErrorKind::State);
        let p2tr = ScriptBuf::from_hex(
            "51203a81504b836967a69399fcf3822adfdb7d61061e42418f6aad0d473cbcc69b86",
        )
        .unwrap();
        assert_eq!(
            classify(&input, Some(&p2tr)).unwrap(),
            SpendKind::TaprootGeneric
        );
    }

    #[test]
    fn test_redeem_script_must_be_wallet_shape() {
        let input = Input {
            redeem_script: Some(ScriptBuf::from_hex("51").unwrap()),
            ..Default::default()
        };
        assert!(classify(&input, None).is_err());
    }
}

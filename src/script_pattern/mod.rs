//! Declarative matching of scripts and witness stacks.
//!
//! A pattern is a list of [`PatternElement`]s compared position by position against a
//! decompiled script. Typed elements capture the bytes they match, nested
//! [`PatternElement::Script`] elements decompile a pushed byte string and recurse.
//!
//! [`parse_signature_script`] uses the matcher to turn a spend's `script_sig` and
//! witness into a [`ScriptDescriptor`].

mod signature_script;

pub use signature_script::{
    parse_signature_script, parse_signature_script_2_of_3, MultisigDescriptor, ScriptDescriptor,
    ScriptPathDescriptor, SignatureSlot,
};
pub(crate) use signature_script::multisig_pattern;

use crate::bitcoin::blockdata::opcodes::{all::OP_PUSHBYTES_0, Opcode};
use crate::bitcoin::script::Instruction;
use crate::bitcoin::{Script, Witness};

/// One decompiled script element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptElement {
    Op(Opcode),
    Push(Vec<u8>),
}

impl ScriptElement {
    fn is_empty_push(&self) -> bool {
        matches!(self, ScriptElement::Push(data) if data.is_empty())
    }
}

/// Decompile a script into opcodes and data pushes.
///
/// Returns `None` when the script contains a truncated push.
pub fn decompile(script: &Script) -> Option<Vec<ScriptElement>> {
    script
        .instructions()
        .map(|instruction| match instruction {
            Ok(Instruction::Op(op)) => Some(ScriptElement::Op(op)),
            Ok(Instruction::PushBytes(bytes)) => {
                Some(ScriptElement::Push(bytes.as_bytes().to_vec()))
            }
            Err(_) => None,
        })
        .collect()
}

/// Every witness item is a data push.
pub fn decompile_witness(witness: &Witness) -> Vec<ScriptElement> {
    witness
        .iter()
        .map(|item| ScriptElement::Push(item.to_vec()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternElement {
    /// A fixed opcode. `OP_0` also matches an empty push.
    Op(Opcode),
    /// Compressed (33 bytes) or uncompressed (65 bytes) public key.
    PubKey,
    /// 32-byte x-only public key.
    PubKeyXOnly,
    /// Any bytes. An empty push is captured as a placeholder.
    Signature,
    /// BIP340 signature, 64 bytes or 65 with a sighash byte.
    SchnorrSignature,
    /// Taproot control block, `33 + 32m` bytes.
    ControlBlock,
    /// A push of exactly this many bytes.
    Bytes(usize),
    /// A push that decompiles into a script matching the nested pattern.
    Script(Vec<PatternElement>),
}

/// Bytes captured by a typed [`PatternElement`], in pattern order.
///
/// A nested script contributes its own raw bytes followed by its captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    PubKey(Vec<u8>),
    PubKeyXOnly([u8; 32]),
    Signature(SignatureSlot),
    ControlBlock(Vec<u8>),
    Bytes(Vec<u8>),
    Script(Vec<u8>),
}

/// First structural mismatch found while matching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchFailure {
    #[error("expected {expected} elements, got {got}")]
    Length { expected: usize, got: usize },
    #[error("element {position} does not match {element:?}")]
    Element {
        position: usize,
        element: PatternElement,
    },
    #[error("nested script at {position} could not be decompiled")]
    Decompile { position: usize },
    #[error("nested script at {position}: {source}")]
    Nested {
        position: usize,
        source: Box<MatchFailure>,
    },
}

fn is_control_block_len(len: usize) -> bool {
    len >= 33 && (len - 33) % 32 == 0 && (len - 33) / 32 <= 128
}

fn match_element(
    position: usize,
    element: &ScriptElement,
    pattern: &PatternElement,
    captures: &mut Vec<Capture>,
) -> Result<(), MatchFailure> {
    let mismatch = || MatchFailure::Element {
        position,
        element: pattern.clone(),
    };
    match (pattern, element) {
        (PatternElement::Op(op), ScriptElement::Op(got)) if op == got => Ok(()),
        (PatternElement::Op(op), e) if *op == OP_PUSHBYTES_0 && e.is_empty_push() => Ok(()),
        (PatternElement::Op(_), _) => Err(mismatch()),
        (pattern, ScriptElement::Op(op)) => {
            // only the placeholder signature may be written as a bare OP_0 opcode
            if *pattern == PatternElement::Signature && *op == OP_PUSHBYTES_0 {
                captures.push(Capture::Signature(SignatureSlot::Placeholder));
                Ok(())
            } else {
                Err(mismatch())
            }
        }
        (PatternElement::PubKey, ScriptElement::Push(data)) => match data.len() {
            33 | 65 => {
                captures.push(Capture::PubKey(data.clone()));
                Ok(())
            }
            _ => Err(mismatch()),
        },
        (PatternElement::PubKeyXOnly, ScriptElement::Push(data)) => {
            let key: [u8; 32] = data.as_slice().try_into().map_err(|_| mismatch())?;
            captures.push(Capture::PubKeyXOnly(key));
            Ok(())
        }
        (PatternElement::Signature, ScriptElement::Push(data)) => {
            let slot = if data.is_empty() {
                SignatureSlot::Placeholder
            } else {
                SignatureSlot::Signature(data.clone())
            };
            captures.push(Capture::Signature(slot));
            Ok(())
        }
        (PatternElement::SchnorrSignature, ScriptElement::Push(data)) => match data.len() {
            64 | 65 => {
                captures.push(Capture::Signature(SignatureSlot::Signature(data.clone())));
                Ok(())
            }
            _ => Err(mismatch()),
        },
        (PatternElement::ControlBlock, ScriptElement::Push(data)) => {
            if !is_control_block_len(data.len()) {
                return Err(mismatch());
            }
            captures.push(Capture::ControlBlock(data.clone()));
            Ok(())
        }
        (PatternElement::Bytes(len), ScriptElement::Push(data)) => {
            if data.len() != *len {
                return Err(mismatch());
            }
            captures.push(Capture::Bytes(data.clone()));
            Ok(())
        }
        (PatternElement::Script(nested), ScriptElement::Push(data)) => {
            let elements = decompile(Script::from_bytes(data))
                .ok_or(MatchFailure::Decompile { position })?;
            captures.push(Capture::Script(data.clone()));
            let nested_captures =
                match_script(&elements, nested).map_err(|e| MatchFailure::Nested {
                    position,
                    source: Box::new(e),
                })?;
            captures.extend(nested_captures);
            Ok(())
        }
    }
}

/// Match `elements` against `pattern` positionally.
pub fn match_script(
    elements: &[ScriptElement],
    pattern: &[PatternElement],
) -> Result<Vec<Capture>, MatchFailure> {
    if elements.len() != pattern.len() {
        return Err(MatchFailure::Length {
            expected: pattern.len(),
            got: elements.len(),
        });
    }
    let mut captures = Vec::new();
    for (position, (element, pattern)) in elements.iter().zip(pattern).enumerate() {
        match_element(position, element, pattern, &mut captures)?;
    }
    Ok(captures)
}

/// Try each pattern in order and return the index and captures of the first match.
///
/// On total failure the last [`MatchFailure`] is returned for diagnostics.
pub fn match_any<'p, I>(
    elements: &[ScriptElement],
    patterns: I,
) -> Result<(usize, Vec<Capture>), MatchFailure>
where
    I: IntoIterator<Item = &'p [PatternElement]>,
{
    let mut last_failure = MatchFailure::Length {
        expected: 0,
        got: elements.len(),
    };
    for (index, pattern) in patterns.into_iter().enumerate() {
        match match_script(elements, pattern) {
            Ok(captures) => return Ok((index, captures)),
            Err(failure) => last_failure = failure,
        }
    }
    Err(last_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::blockdata::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY};
    use crate::bitcoin::blockdata::script::Builder;

    fn leaf_pattern() -> Vec<PatternElement> {
        vec![
            PatternElement::PubKeyXOnly,
            PatternElement::Op(OP_CHECKSIGVERIFY),
            PatternElement::PubKeyXOnly,
            PatternElement::Op(OP_CHECKSIG),
        ]
    }

    fn leaf_script() -> crate::bitcoin::ScriptBuf {
        Builder::new()
            .push_slice([1u8; 32])
            .push_opcode(OP_CHECKSIGVERIFY)
            .push_slice([2u8; 32])
            .push_opcode(OP_CHECKSIG)
            .into_script()
    }

    #[test]
    fn test_match_captures_in_order() {
        let elements = decompile(&leaf_script()).unwrap();
        let captures = match_script(&elements, &leaf_pattern()).unwrap();
        assert_eq!(
            captures,
            vec![
                Capture::PubKeyXOnly([1u8; 32]),
                Capture::PubKeyXOnly([2u8; 32])
            ]
        );
    }

    #[test]
    fn test_length_mismatch() {
        let elements = decompile(&leaf_script()).unwrap();
        let failure = match_script(&elements[..3], &leaf_pattern()).unwrap_err();
        assert_eq!(
            failure,
            MatchFailure::Length {
                expected: 4,
                got: 3
            }
        );
    }

    #[test]
    fn test_failure_names_offending_element() {
        let mut elements = decompile(&leaf_script()).unwrap();
        elements[2] = ScriptElement::Push(vec![2u8; 33]);
        let failure = match_script(&elements, &leaf_pattern()).unwrap_err();
        assert_eq!(
            failure,
            MatchFailure::Element {
                position: 2,
                element: PatternElement::PubKeyXOnly
            }
        );
    }

    #[test]
    fn test_nested_script_and_placeholder() {
        let elements = vec![
            ScriptElement::Push(vec![]),
            ScriptElement::Push(vec![0x30; 71]),
            ScriptElement::Push(leaf_script().to_bytes()),
        ];
        let pattern = vec![
            PatternElement::Signature,
            PatternElement::Signature,
            PatternElement::Script(leaf_pattern()),
        ];
        let captures = match_script(&elements, &pattern).unwrap();
        assert_eq!(captures[0], Capture::Signature(SignatureSlot::Placeholder));
        assert_eq!(
            captures[1],
            Capture::Signature(SignatureSlot::Signature(vec![0x30; 71]))
        );
        assert_eq!(captures[2], Capture::Script(leaf_script().to_bytes()));
        assert_eq!(captures.len(), 5);
    }

    #[test]
    fn test_nested_failure_is_wrapped() {
        let elements = vec![ScriptElement::Push(vec![0x51, 0x52])];
        let failure =
            match_script(&elements, &[PatternElement::Script(leaf_pattern())]).unwrap_err();
        assert!(matches!(failure, MatchFailure::Nested { position: 0, .. }));
    }

    #[test]
    fn test_match_any_returns_first_success() {
        let elements = vec![ScriptElement::Push(vec![7u8; 64])];
        let patterns: Vec<Vec<PatternElement>> = vec![
            vec![PatternElement::PubKey],
            vec![PatternElement::SchnorrSignature],
            vec![PatternElement::Signature],
        ];
        let (index, _) = match_any(&elements, patterns.iter().map(|p| p.as_slice())).unwrap();
        assert_eq!(index, 1);

        let none: Vec<Vec<PatternElement>> = vec![vec![PatternElement::ControlBlock]];
        assert!(match_any(&elements, none.iter().map(|p| p.as_slice())).is_err());
    }

    #[test]
    fn test_control_block_lengths() {
        assert!(is_control_block_len(33));
        assert!(is_control_block_len(65));
        assert!(is_control_block_len(33 + 32 * 128));
        assert!(!is_control_block_len(34));
        assert!(!is_control_block_len(33 + 32 * 129));
    }
}

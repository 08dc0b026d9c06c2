use crate::bitcoin::blockdata::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_PUSHBYTES_0, OP_PUSHNUM_2, OP_PUSHNUM_3,
};
use crate::bitcoin::hashes::{sha256, Hash};
use crate::bitcoin::{PublicKey, Script, ScriptBuf, Witness, XOnlyPublicKey};
use crate::error::{Error, Result};

use super::{
    decompile, decompile_witness, match_any, Capture, PatternElement, PatternElement as P,
};

/// One signature position of a spend. Unsigned positions are encoded as an empty push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSlot {
    Signature(Vec<u8>),
    Placeholder,
}

impl SignatureSlot {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SignatureSlot::Signature(bytes) => Some(bytes),
            SignatureSlot::Placeholder => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, SignatureSlot::Placeholder)
    }

    /// Bytes as they appear on the stack.
    pub fn to_push(&self) -> Vec<u8> {
        self.as_bytes().map(<[u8]>::to_vec).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigDescriptor {
    pub public_keys: [PublicKey; 3],
    /// Two entries for a fully signed spend, three (with placeholders) for a partial one.
    pub signatures: Vec<SignatureSlot>,
    pub pub_script: ScriptBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPathDescriptor {
    /// In leaf script order.
    pub public_keys: [XOnlyPublicKey; 2],
    /// Ordered like `public_keys`. The witness carries them in reverse.
    pub signatures: Vec<SignatureSlot>,
    pub pub_script: ScriptBuf,
    pub control_block: Vec<u8>,
    pub leaf_version: u8,
}

/// Spend shape recovered from an input's `script_sig` and witness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptDescriptor {
    P2shP2pk {
        public_key: PublicKey,
        signatures: Vec<SignatureSlot>,
        pub_script: ScriptBuf,
    },
    P2sh2of3(MultisigDescriptor),
    P2shP2wsh2of3(MultisigDescriptor),
    P2wsh2of3(MultisigDescriptor),
    TaprootKeyPath {
        signatures: Vec<SignatureSlot>,
    },
    TaprootScriptPath(ScriptPathDescriptor),
}

impl ScriptDescriptor {
    pub fn signatures(&self) -> &[SignatureSlot] {
        match self {
            ScriptDescriptor::P2shP2pk { signatures, .. }
            | ScriptDescriptor::TaprootKeyPath { signatures } => signatures,
            ScriptDescriptor::P2sh2of3(d)
            | ScriptDescriptor::P2shP2wsh2of3(d)
            | ScriptDescriptor::P2wsh2of3(d) => &d.signatures,
            ScriptDescriptor::TaprootScriptPath(d) => &d.signatures,
        }
    }

    /// The script committed to by the output, if the spend reveals one.
    pub fn pub_script(&self) -> Option<&Script> {
        match self {
            ScriptDescriptor::P2shP2pk { pub_script, .. } => Some(pub_script),
            ScriptDescriptor::P2sh2of3(d)
            | ScriptDescriptor::P2shP2wsh2of3(d)
            | ScriptDescriptor::P2wsh2of3(d) => Some(&d.pub_script),
            ScriptDescriptor::TaprootScriptPath(d) => Some(&d.pub_script),
            ScriptDescriptor::TaprootKeyPath { .. } => None,
        }
    }

    pub fn multisig(&self) -> Option<&MultisigDescriptor> {
        match self {
            ScriptDescriptor::P2sh2of3(d)
            | ScriptDescriptor::P2shP2wsh2of3(d)
            | ScriptDescriptor::P2wsh2of3(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_taproot(&self) -> bool {
        matches!(
            self,
            ScriptDescriptor::TaprootKeyPath { .. } | ScriptDescriptor::TaprootScriptPath(_)
        )
    }
}

pub(crate) fn multisig_pattern() -> Vec<PatternElement> {
    vec![
        P::Op(OP_PUSHNUM_2),
        P::PubKey,
        P::PubKey,
        P::PubKey,
        P::Op(OP_PUSHNUM_3),
        P::Op(OP_CHECKMULTISIG),
    ]
}

fn multisig_spend_patterns() -> [Vec<PatternElement>; 2] {
    [
        vec![
            P::Op(OP_PUSHBYTES_0),
            P::Signature,
            P::Signature,
            P::Signature,
            P::Script(multisig_pattern()),
        ],
        vec![
            P::Op(OP_PUSHBYTES_0),
            P::Signature,
            P::Signature,
            P::Script(multisig_pattern()),
        ],
    ]
}

fn taproot_script_path_pattern() -> Vec<PatternElement> {
    vec![
        P::Signature,
        P::Signature,
        P::Script(vec![
            P::PubKeyXOnly,
            P::Op(OP_CHECKSIGVERIFY),
            P::PubKeyXOnly,
            P::Op(OP_CHECKSIG),
        ]),
        P::ControlBlock,
    ]
}

fn taproot_key_path_pattern() -> Vec<PatternElement> {
    vec![P::SchnorrSignature]
}

fn p2sh_p2pk_pattern() -> Vec<PatternElement> {
    vec![P::Signature, P::Script(vec![P::PubKey, P::Op(OP_CHECKSIG)])]
}

fn p2sh_p2wsh_redeem_pattern() -> Vec<PatternElement> {
    vec![P::Script(vec![P::Op(OP_PUSHBYTES_0), P::Bytes(32)])]
}

/// Typed access to captures in the order the pattern produced them.
struct Captures(std::vec::IntoIter<Capture>);

impl Captures {
    fn unexpected(what: &str, got: Option<Capture>) -> Error {
        Error::IllegalState(format!("expected {} capture, got {:?}", what, got))
    }

    fn signature(&mut self) -> Result<SignatureSlot> {
        match self.0.next() {
            Some(Capture::Signature(slot)) => Ok(slot),
            other => Err(Self::unexpected("signature", other)),
        }
    }

    fn signatures_until_script(&mut self) -> Result<(Vec<SignatureSlot>, ScriptBuf)> {
        let mut signatures = Vec::new();
        loop {
            match self.0.next() {
                Some(Capture::Signature(slot)) => signatures.push(slot),
                Some(Capture::Script(bytes)) => return Ok((signatures, ScriptBuf::from(bytes))),
                other => return Err(Self::unexpected("signature or script", other)),
            }
        }
    }

    fn script(&mut self) -> Result<ScriptBuf> {
        match self.0.next() {
            Some(Capture::Script(bytes)) => Ok(ScriptBuf::from(bytes)),
            other => Err(Self::unexpected("script", other)),
        }
    }

    fn pub_key(&mut self) -> Result<PublicKey> {
        match self.0.next() {
            Some(Capture::PubKey(bytes)) => PublicKey::from_slice(&bytes)
                .map_err(|e| Error::UnparsableInput(format!("invalid public key: {}", e))),
            other => Err(Self::unexpected("public key", other)),
        }
    }

    fn xonly(&mut self) -> Result<XOnlyPublicKey> {
        match self.0.next() {
            Some(Capture::PubKeyXOnly(bytes)) => XOnlyPublicKey::from_slice(&bytes)
                .map_err(|e| Error::UnparsableInput(format!("invalid x-only key: {}", e))),
            other => Err(Self::unexpected("x-only key", other)),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        match self.0.next() {
            Some(Capture::Bytes(bytes)) | Some(Capture::ControlBlock(bytes)) => Ok(bytes),
            other => Err(Self::unexpected("bytes", other)),
        }
    }
}

fn multisig_descriptor(captures: Vec<Capture>) -> Result<MultisigDescriptor> {
    let mut captures = Captures(captures.into_iter());
    let (signatures, pub_script) = captures.signatures_until_script()?;
    let public_keys = [captures.pub_key()?, captures.pub_key()?, captures.pub_key()?];
    Ok(MultisigDescriptor {
        public_keys,
        signatures,
        pub_script,
    })
}

fn script_path_descriptor(captures: Vec<Capture>) -> Result<ScriptPathDescriptor> {
    let mut captures = Captures(captures.into_iter());
    let witness_first = captures.signature()?;
    let witness_second = captures.signature()?;
    let pub_script = captures.script()?;
    let public_keys = [captures.xonly()?, captures.xonly()?];
    let control_block = captures.bytes()?;
    let leaf_version = control_block[0] & 0xfe;
    Ok(ScriptPathDescriptor {
        public_keys,
        // the first key in the leaf consumes the top stack item
        signatures: vec![witness_second, witness_first],
        pub_script,
        control_block,
        leaf_version,
    })
}

fn parse_witness(witness: &Witness) -> Result<ScriptDescriptor> {
    let elements = decompile_witness(witness);
    let [ms3, ms2] = multisig_spend_patterns();
    let patterns = [
        ms3,
        ms2,
        taproot_script_path_pattern(),
        taproot_key_path_pattern(),
    ];
    let (index, captures) = match_any(&elements, patterns.iter().map(Vec::as_slice))
        .map_err(|e| Error::UnparsableInput(e.to_string()))?;
    match index {
        0 | 1 => Ok(ScriptDescriptor::P2wsh2of3(multisig_descriptor(captures)?)),
        2 => Ok(ScriptDescriptor::TaprootScriptPath(script_path_descriptor(
            captures,
        )?)),
        _ => {
            let signature = Captures(captures.into_iter()).signature()?;
            Ok(ScriptDescriptor::TaprootKeyPath {
                signatures: vec![signature],
            })
        }
    }
}

fn parse_p2sh_p2wsh(script_sig: &Script, witness: &Witness) -> Result<ScriptDescriptor> {
    let unparsable = |reason: String| Error::UnparsableInput(reason);
    let elements = decompile(script_sig).ok_or_else(|| unparsable("truncated script_sig".into()))?;
    let redeem_captures = super::match_script(&elements, &p2sh_p2wsh_redeem_pattern())
        .map_err(|e| unparsable(e.to_string()))?;
    let mut redeem = Captures(redeem_captures.into_iter());
    redeem.script()?;
    let witness_script_hash = redeem.bytes()?;

    let [ms3, ms2] = multisig_spend_patterns();
    let (_, captures) = match_any(&decompile_witness(witness), [ms3.as_slice(), ms2.as_slice()])
        .map_err(|e| unparsable(e.to_string()))?;
    let descriptor = multisig_descriptor(captures)?;
    if sha256::Hash::hash(descriptor.pub_script.as_bytes()).to_byte_array()[..]
        != witness_script_hash[..]
    {
        return Err(unparsable(
            "redeem script does not commit to witness script".into(),
        ));
    }
    Ok(ScriptDescriptor::P2shP2wsh2of3(descriptor))
}

fn parse_script_sig(script_sig: &Script) -> Result<ScriptDescriptor> {
    let elements = decompile(script_sig)
        .ok_or_else(|| Error::UnparsableInput("truncated script_sig".to_string()))?;
    let [ms3, ms2] = multisig_spend_patterns();
    let patterns = [ms3, ms2, p2sh_p2pk_pattern()];
    let (index, captures) = match_any(&elements, patterns.iter().map(Vec::as_slice))
        .map_err(|e| Error::UnparsableInput(e.to_string()))?;
    if index < 2 {
        return Ok(ScriptDescriptor::P2sh2of3(multisig_descriptor(captures)?));
    }
    let mut captures = Captures(captures.into_iter());
    let signature = captures.signature()?;
    let pub_script = captures.script()?;
    let public_key = captures.pub_key()?;
    Ok(ScriptDescriptor::P2shP2pk {
        public_key,
        signatures: vec![signature],
        pub_script,
    })
}

/// Recover the spend descriptor of a (possibly partially) signed input.
pub fn parse_signature_script(script_sig: &Script, witness: &Witness) -> Result<ScriptDescriptor> {
    match (script_sig.is_empty(), witness.is_empty()) {
        (false, false) => parse_p2sh_p2wsh(script_sig, witness),
        (true, false) => parse_witness(witness),
        (false, true) => parse_script_sig(script_sig),
        (true, true) => Err(Error::UnparsableInput(
            "empty script_sig and witness".to_string(),
        )),
    }
}

/// Like [`parse_signature_script`] but only accepts the 2-of-3 multisig shapes.
pub fn parse_signature_script_2_of_3(
    script_sig: &Script,
    witness: &Witness,
) -> Result<MultisigDescriptor> {
    match parse_signature_script(script_sig, witness)? {
        ScriptDescriptor::P2sh2of3(d)
        | ScriptDescriptor::P2shP2wsh2of3(d)
        | ScriptDescriptor::P2wsh2of3(d) => Ok(d),
        other => Err(Error::UnparsableInput(format!(
            "expected 2-of-3 multisig spend, got {:?}",
            other
        ))),
    }
}

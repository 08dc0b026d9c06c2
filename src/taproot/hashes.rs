use crate::bitcoin::consensus::encode::{serialize, VarInt};
use crate::bitcoin::hashes::{sha256, Hash, HashEngine};
use crate::bitcoin::secp256k1::{Scalar, Secp256k1, SecretKey, XOnlyPublicKey};
use crate::bitcoin::taproot::LeafVersion;

use super::TaprootError;

/// BIP340 tagged hash: `sha256(sha256(tag) || sha256(tag) || msg)`.
pub fn tagged_hash(tag: &str, msg: &[u8]) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(tag.as_bytes());
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_byte_array());
    engine.input(tag_hash.as_byte_array());
    engine.input(msg);
    sha256::Hash::from_engine(engine).to_byte_array()
}

pub fn hash_tap_leaf(script: &[u8], leaf_version: LeafVersion) -> [u8; 32] {
    let mut msg = vec![leaf_version.to_consensus()];
    msg.extend(serialize(&VarInt(script.len() as u64)));
    msg.extend_from_slice(script);
    tagged_hash("TapLeaf", &msg)
}

/// Children are sorted before hashing, so the result does not depend on argument order.
pub fn hash_tap_branch(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut msg = [0u8; 64];
    msg[..32].copy_from_slice(lo);
    msg[32..].copy_from_slice(hi);
    tagged_hash("TapBranch", &msg)
}

pub fn calculate_tap_tweak(pubkey: &[u8; 32], merkle_root: Option<&[u8; 32]>) -> [u8; 32] {
    let mut msg = pubkey.to_vec();
    if let Some(root) = merkle_root {
        msg.extend_from_slice(root);
    }
    tagged_hash("TapTweak", &msg)
}

/// Tweak an x-only internal key. Returns the output key and its parity (1 = odd).
pub fn tap_tweak_pubkey(
    pubkey: &[u8; 32],
    merkle_root: Option<&[u8; 32]>,
) -> Result<([u8; 32], u8), TaprootError> {
    let secp = Secp256k1::verification_only();
    let internal =
        XOnlyPublicKey::from_slice(pubkey).map_err(|_| TaprootError::InvalidPoint("internal key"))?;
    let tweak = Scalar::from_be_bytes(calculate_tap_tweak(pubkey, merkle_root))
        .map_err(|_| TaprootError::InvalidTweak)?;
    let (output, parity) = internal
        .add_tweak(&secp, &tweak)
        .map_err(|_| TaprootError::InvalidTweak)?;
    Ok((output.serialize(), parity.to_u8()))
}

/// Tweak a secret key for a key-path spend.
///
/// The key is negated first when its public key has odd y, so the result signs for the
/// even-y output key.
pub fn tap_tweak_privkey(
    secret: &SecretKey,
    merkle_root: Option<&[u8; 32]>,
) -> Result<SecretKey, TaprootError> {
    let secp = Secp256k1::signing_only();
    let (xonly, parity) = secret.x_only_public_key(&secp);
    let secret = match parity {
        crate::bitcoin::secp256k1::Parity::Odd => secret.negate(),
        crate::bitcoin::secp256k1::Parity::Even => *secret,
    };
    let tweak = Scalar::from_be_bytes(calculate_tap_tweak(&xonly.serialize(), merkle_root))
        .map_err(|_| TaprootError::InvalidTweak)?;
    secret
        .add_tweak(&tweak)
        .map_err(|_| TaprootError::InvalidTweak)
}

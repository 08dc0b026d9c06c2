use std::collections::BTreeMap;

use crate::bitcoin::bip32::{DerivationPath, Fingerprint};
use crate::bitcoin::blockdata::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY};
use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::secp256k1::Secp256k1;
use crate::bitcoin::taproot::{LeafVersion, TapLeafHash};
use crate::bitcoin::{CompressedPublicKey, ScriptBuf, XOnlyPublicKey};
use crate::error::Result;
use crate::fixed_script_wallet::wallet_keys::{derivation_path, PubTriple, RootWalletKeys};
use crate::taproot::{ControlBlock, LeafLayout, P2trPayment};

fn to_xonly_pubkey(key: &CompressedPublicKey) -> XOnlyPublicKey {
    key.0.x_only_public_key().0
}

/// `<k1> OP_CHECKSIGVERIFY <k2> OP_CHECKSIGVERIFY ... <kn> OP_CHECKSIG` over x-only keys.
pub fn build_p2tr_ns_script(keys: &[CompressedPublicKey]) -> ScriptBuf {
    let mut builder = Builder::default();
    for (i, key) in keys.iter().enumerate() {
        builder = builder.push_slice(to_xonly_pubkey(key).serialize());
        if i == keys.len() - 1 {
            builder = builder.push_opcode(OP_CHECKSIG);
        } else {
            builder = builder.push_opcode(OP_CHECKSIGVERIFY);
        }
    }
    builder.into_script()
}

/// A script leaf of a wallet output and the two keys it requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapLeafKeys {
    pub depth: u8,
    pub keys: [CompressedPublicKey; 2],
}

impl TapLeafKeys {
    pub fn script(&self) -> ScriptBuf {
        build_p2tr_ns_script(&self.keys)
    }

    pub fn leaf_hash(&self) -> TapLeafHash {
        TapLeafHash::from_script(&self.script(), LeafVersion::TapScript)
    }
}

/// Leaves in depth-first order.
///
/// p2trMusig2: user+backup and backup+bitgo, both at depth 1 (user+bitgo spends use the
/// key path). p2trLegacy: user+bitgo at depth 1, user+backup and backup+bitgo at depth 2.
pub fn get_tap_leaves(keys: &PubTriple, is_musig2: bool) -> Vec<TapLeafKeys> {
    let [user, backup, bitgo] = *keys;
    let leaf = |depth, keys| TapLeafKeys { depth, keys };
    if is_musig2 {
        vec![leaf(1, [user, backup]), leaf(1, [backup, bitgo])]
    } else {
        vec![
            leaf(1, [user, bitgo]),
            leaf(2, [user, backup]),
            leaf(2, [backup, bitgo]),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct ScriptP2tr {
    pub leaves: Vec<TapLeafKeys>,
    pub payment: P2trPayment,
}

impl ScriptP2tr {
    /// The internal key is the MuSig2 aggregate of the user and bitgo keys.
    pub fn new(keys: &PubTriple, is_musig2: bool) -> Result<ScriptP2tr> {
        let [user, _backup, bitgo] = *keys;
        let leaves = get_tap_leaves(keys, is_musig2);
        let payment = P2trPayment::builder()
            .pubkeys(&[user, bitgo])
            .leaves(LeafLayout::DepthFirst(
                leaves.iter().map(|l| (l.depth, l.script())).collect(),
            ))
            .build()?;
        Ok(ScriptP2tr { leaves, payment })
    }

    pub fn output_script(&self) -> ScriptBuf {
        self.payment.output_script.clone()
    }

    pub fn internal_key(&self) -> [u8; 32] {
        self.payment.internal_key
    }

    pub fn merkle_root(&self) -> Option<[u8; 32]> {
        self.payment.merkle_root()
    }

    /// Leaf script and control block for a spend by `signers`, in either order.
    pub fn leaf_for_signers(
        &self,
        signers: [CompressedPublicKey; 2],
    ) -> Option<(usize, ScriptBuf, ControlBlock)> {
        let index = self.leaves.iter().position(|leaf| {
            leaf.keys == signers || leaf.keys == [signers[1], signers[0]]
        })?;
        let control_block = self.payment.control_block(index)?;
        Some((index, self.leaves[index].script(), control_block))
    }
}

pub type TapKeyOrigins =
    BTreeMap<XOnlyPublicKey, (Vec<TapLeafHash>, (Fingerprint, DerivationPath))>;

/// Tap key origins for a wallet output: every key maps to the leaves it appears in.
pub fn create_tap_bip32_derivation_for_output(
    wallet_keys: &RootWalletKeys,
    chain: u32,
    index: u32,
    pub_triple: &PubTriple,
    is_musig2: bool,
) -> Result<TapKeyOrigins> {
    let secp = Secp256k1::verification_only();
    let leaves = get_tap_leaves(pub_triple, is_musig2);

    let mut map = BTreeMap::new();
    for (i, key) in pub_triple.iter().enumerate() {
        let xpub = &wallet_keys.xpubs[i];
        let path = derivation_path(&wallet_keys.derivation_prefixes[i], chain, index);
        let derived = xpub.derive_pub(&secp, &path)?;
        let leaf_hashes: Vec<TapLeafHash> = leaves
            .iter()
            .filter(|leaf| leaf.keys.contains(key))
            .map(TapLeafKeys::leaf_hash)
            .collect();
        map.insert(
            derived.public_key.x_only_public_key().0,
            (leaf_hashes, (xpub.fingerprint(), path)),
        );
    }
    Ok(map)
}

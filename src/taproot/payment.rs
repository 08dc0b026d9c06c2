use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::taproot::LeafVersion;
use crate::bitcoin::{CompressedPublicKey, ScriptBuf};
use crate::Network;

use super::control_block::ControlBlock;
use super::hashes::{hash_tap_leaf, tap_tweak_pubkey};
use super::tree::Taptree;
use super::TaprootError;

/// How leaf scripts are arranged into a tree.
#[derive(Debug, Clone)]
pub enum LeafLayout {
    /// `(weight, script)` pairs combined by weight.
    Huffman(Vec<(u32, ScriptBuf)>),
    /// `(depth, script)` pairs in depth-first pre-order.
    DepthFirst(Vec<(u8, ScriptBuf)>),
}

impl LeafLayout {
    fn scripts(&self) -> Vec<ScriptBuf> {
        match self {
            LeafLayout::Huffman(leaves) => leaves.iter().map(|(_, s)| s.clone()).collect(),
            LeafLayout::DepthFirst(leaves) => leaves.iter().map(|(_, s)| s.clone()).collect(),
        }
    }

    fn build(&self) -> Result<Taptree, TaprootError> {
        let leaf_hash = |s: &ScriptBuf| hash_tap_leaf(s.as_bytes(), LeafVersion::TapScript);
        match self {
            LeafLayout::Huffman(leaves) => Taptree::huffman(
                &leaves
                    .iter()
                    .map(|(weight, s)| (*weight, leaf_hash(s)))
                    .collect::<Vec<_>>(),
            ),
            LeafLayout::DepthFirst(leaves) => Taptree::depth_first(
                &leaves
                    .iter()
                    .map(|(depth, s)| (*depth, leaf_hash(s)))
                    .collect::<Vec<_>>(),
            ),
        }
    }
}

/// The leaf a spender intends to reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemLeaf {
    pub index: usize,
    pub script: ScriptBuf,
    pub control_block: ControlBlock,
}

impl RedeemLeaf {
    /// Witness stack tail for a script-path spend: `[script, control_block]`.
    /// Signatures go in front of it.
    pub fn witness_template(&self) -> Vec<Vec<u8>> {
        vec![self.script.to_bytes(), self.control_block.encode()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2trPayment {
    pub internal_key: [u8; 32],
    pub taptree: Option<Taptree>,
    pub leaf_scripts: Vec<ScriptBuf>,
    pub output_key: [u8; 32],
    pub parity: u8,
    pub output_script: ScriptBuf,
    pub address: Option<String>,
    pub redeem: Option<RedeemLeaf>,
}

impl P2trPayment {
    pub fn builder() -> P2trPaymentBuilder {
        P2trPaymentBuilder::default()
    }

    pub fn merkle_root(&self) -> Option<[u8; 32]> {
        self.taptree.as_ref().map(|t| t.root)
    }

    pub fn control_block(&self, leaf_index: usize) -> Option<ControlBlock> {
        let path = self.taptree.as_ref()?.path(leaf_index)?;
        Some(ControlBlock {
            parity: self.parity,
            internal_key: self.internal_key,
            leaf_version: LeafVersion::TapScript,
            path: path.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct P2trPaymentBuilder {
    internal_key: Option<[u8; 32]>,
    pubkeys: Vec<CompressedPublicKey>,
    leaves: Option<LeafLayout>,
    redeem_index: Option<usize>,
    network: Option<Network>,
}

impl P2trPaymentBuilder {
    pub fn internal_key(mut self, key: [u8; 32]) -> Self {
        self.internal_key = Some(key);
        self
    }

    /// Participant keys whose BIP327 aggregate becomes the internal key.
    pub fn pubkeys(mut self, keys: &[CompressedPublicKey]) -> Self {
        self.pubkeys = keys.to_vec();
        self
    }

    pub fn leaves(mut self, layout: LeafLayout) -> Self {
        self.leaves = Some(layout);
        self
    }

    pub fn redeem_index(mut self, index: usize) -> Self {
        self.redeem_index = Some(index);
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn build(self) -> Result<P2trPayment, TaprootError> {
        let internal_key = match (self.internal_key, self.pubkeys.is_empty()) {
            (Some(key), true) => key,
            (None, false) => crate::musig2::key_agg(&self.pubkeys)
                .map_err(|e| TaprootError::KeyAggregation(e.to_string()))?,
            (Some(_), false) => return Err(TaprootError::ConflictingInternalKey),
            (None, true) => return Err(TaprootError::MissingInternalKey),
        };

        let (taptree, leaf_scripts) = match &self.leaves {
            Some(layout) => (Some(layout.build()?), layout.scripts()),
            None => (None, Vec::new()),
        };

        let merkle_root = taptree.as_ref().map(|t| t.root);
        let (output_key, parity) = tap_tweak_pubkey(&internal_key, merkle_root.as_ref())?;
        let output_script = Builder::new()
            .push_int(1)
            .push_slice(output_key)
            .into_script();

        let address = self
            .network
            .map(|network| {
                crate::address::from_output_script_with_network(&output_script, network)
                    .map_err(|e| TaprootError::Address(e.to_string()))
            })
            .transpose()?;

        let mut payment = P2trPayment {
            internal_key,
            taptree,
            leaf_scripts,
            output_key,
            parity,
            output_script,
            address,
            redeem: None,
        };

        if let Some(index) = self.redeem_index {
            let count = payment.leaf_scripts.len();
            let control_block = payment
                .control_block(index)
                .ok_or(TaprootError::InvalidRedeemIndex { index, count })?;
            payment.redeem = Some(RedeemLeaf {
                index,
                script: payment.leaf_scripts[index].clone(),
                control_block,
            });
        }
        Ok(payment)
    }
}

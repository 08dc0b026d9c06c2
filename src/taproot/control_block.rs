use crate::bitcoin::secp256k1::XOnlyPublicKey;
use crate::bitcoin::taproot::{self, LeafVersion, TAPROOT_ANNEX_PREFIX};

use super::hashes::{hash_tap_branch, hash_tap_leaf};
use super::TaprootError;

pub const CONTROL_BLOCK_BASE_SIZE: usize = 33;
pub const CONTROL_BLOCK_NODE_SIZE: usize = 32;
pub const MAX_CONTROL_BLOCK_NODES: usize = 128;

/// Decoded taproot control block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlBlock {
    /// Parity of the output key, 0 or 1.
    pub parity: u8,
    pub internal_key: [u8; 32],
    pub leaf_version: LeafVersion,
    /// Sibling hashes from the leaf up to the root.
    pub path: Vec<[u8; 32]>,
}

impl ControlBlock {
    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(CONTROL_BLOCK_BASE_SIZE + CONTROL_BLOCK_NODE_SIZE * self.path.len());
        out.push(self.leaf_version.to_consensus() | (self.parity & 1));
        out.extend_from_slice(&self.internal_key);
        for node in &self.path {
            out.extend_from_slice(node);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TaprootError> {
        let len = bytes.len();
        if len < CONTROL_BLOCK_BASE_SIZE
            || (len - 1) % CONTROL_BLOCK_NODE_SIZE != 0
            || len > CONTROL_BLOCK_BASE_SIZE + CONTROL_BLOCK_NODE_SIZE * MAX_CONTROL_BLOCK_NODES
        {
            return Err(TaprootError::InvalidControlBlockLength(len));
        }
        let version = bytes[0] & 0xfe;
        if version == TAPROOT_ANNEX_PREFIX {
            return Err(TaprootError::InvalidLeafVersion(version));
        }
        let leaf_version = LeafVersion::from_consensus(version)
            .map_err(|_| TaprootError::InvalidLeafVersion(version))?;
        let mut internal_key = [0u8; 32];
        internal_key.copy_from_slice(&bytes[1..33]);
        XOnlyPublicKey::from_slice(&internal_key)
            .map_err(|_| TaprootError::InvalidPoint("control block internal key"))?;
        let path = bytes[33..]
            .chunks_exact(CONTROL_BLOCK_NODE_SIZE)
            .map(|chunk| {
                let mut node = [0u8; 32];
                node.copy_from_slice(chunk);
                node
            })
            .collect();
        Ok(ControlBlock {
            parity: bytes[0] & 1,
            internal_key,
            leaf_version,
            path,
        })
    }

    /// Merkle root committed to by `script` under this control block.
    pub fn compute_root(&self, script: &[u8]) -> [u8; 32] {
        let leaf = hash_tap_leaf(script, self.leaf_version);
        self.path
            .iter()
            .fold(leaf, |node, sibling| hash_tap_branch(&node, sibling))
    }

    pub fn to_bitcoin(&self) -> Result<taproot::ControlBlock, TaprootError> {
        taproot::ControlBlock::decode(&self.encode())
            .map_err(|e| TaprootError::InvalidControlBlock(e.to_string()))
    }
}

//! Taproot commitments: tagged hashes, script trees, tweaks and control blocks.
//!
//! Everything here works on raw 32-byte hashes and x-only keys so that trees built from
//! PSBT fields, wallet scripts and control blocks all meet in one representation.

mod control_block;
mod hashes;
mod payment;
mod tree;

pub use control_block::{ControlBlock, CONTROL_BLOCK_BASE_SIZE, MAX_CONTROL_BLOCK_NODES};
pub use hashes::{
    calculate_tap_tweak, hash_tap_branch, hash_tap_leaf, tagged_hash, tap_tweak_privkey,
    tap_tweak_pubkey,
};
pub use payment::{LeafLayout, P2trPayment, P2trPaymentBuilder, RedeemLeaf};
pub use tree::{verify_merkle_path, Taptree, TAPROOT_MAX_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaprootError {
    #[error("invalid {0}")]
    InvalidPoint(&'static str),
    #[error("tweak is out of range or produces the point at infinity")]
    InvalidTweak,
    #[error("invalid control block length {0}")]
    InvalidControlBlockLength(usize),
    #[error("invalid leaf version {0:#04x}")]
    InvalidLeafVersion(u8),
    #[error("invalid control block: {0}")]
    InvalidControlBlock(String),
    #[error("script tree has no leaves")]
    EmptyTree,
    #[error("leaf {0} has weight zero")]
    InvalidWeight(usize),
    #[error("leaves do not form a complete binary tree")]
    IncompleteTree,
    #[error("leaf depth {0} exceeds 128")]
    DepthExceeded(u8),
    #[error("no internal key or participant keys given")]
    MissingInternalKey,
    #[error("both an internal key and participant keys given")]
    ConflictingInternalKey,
    #[error("key aggregation failed: {0}")]
    KeyAggregation(String),
    #[error("redeem leaf {index} out of range (leaves: {count})")]
    InvalidRedeemIndex { index: usize, count: usize },
    #[error("address: {0}")]
    Address(String),
}

//! Taproot and MuSig2 aware PSBT signing for UTXO chains.
//!
//! The crate is layered the same way data flows through a signing round:
//! [`script_pattern`] recovers spend descriptors from raw scripts, [`taproot`] computes
//! commitments and control blocks, [`musig2`] runs the two-party key-path session,
//! [`psbt`] drives the per-input classify/sign/validate/finalize state machine and
//! [`verify`] audits signatures on finished transactions.
pub mod address;
pub mod error;
pub mod fixed_script_wallet;
pub mod musig2;
mod networks;
pub mod psbt;
pub mod script_pattern;
pub mod taproot;
#[cfg(test)]
mod test_utils;
pub mod verify;
pub mod wasm;

// re-export bitcoin from the miniscript crate
pub use ::miniscript::bitcoin;

pub use error::{Error, ErrorKind, Result};
pub use networks::{Network, OutputScriptSupport};
pub use psbt::{SighashPolicy, SpendKind, WalletPsbt};

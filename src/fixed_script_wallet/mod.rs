//! Fixed-script 2-of-3 wallets: root keys, chains and the output scripts derived from them.
//!
//! These wallets are not descriptor based; the script type is encoded in the chain
//! component of the derivation path.
pub mod wallet_keys;
pub mod wallet_scripts;

pub use wallet_keys::*;
pub use wallet_scripts::*;

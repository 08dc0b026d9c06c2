//! Output scripts of 2-of-3 fixed-script wallets.
mod checkmultisig;
mod checksigverify;
mod singlesig;

pub use checkmultisig::{
    build_multisig_script_2_of_3, parse_multisig_script_2_of_3, ScriptP2sh, ScriptP2shP2wsh,
    ScriptP2wsh,
};
pub use checksigverify::{
    build_p2tr_ns_script, create_tap_bip32_derivation_for_output, get_tap_leaves, ScriptP2tr,
    TapKeyOrigins, TapLeafKeys,
};
pub use singlesig::{build_p2pk_script, ScriptP2shP2pk};

use std::fmt;
use std::str::FromStr;

use crate::bitcoin::ScriptBuf;
use crate::error::{Error, Result};
use crate::fixed_script_wallet::wallet_keys::{to_pub_triple, PubTriple, RootWalletKeys};
use crate::OutputScriptSupport;

/// Scripts that belong to fixed-script wallets.
#[derive(Debug, Clone)]
pub enum WalletScripts {
    /// Chains 0 and 1.
    P2sh(ScriptP2sh),
    /// Chains 10 and 11.
    P2shP2wsh(ScriptP2shP2wsh),
    /// Chains 20 and 21.
    P2wsh(ScriptP2wsh),
    /// Chains 30 and 31. Script-path spends only.
    P2trLegacy(ScriptP2tr),
    /// Chains 40 and 41. Key-path spends through MuSig2.
    P2trMusig2(ScriptP2tr),
}

impl fmt::Display for WalletScripts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalletScripts::P2sh(_) => "P2sh",
            WalletScripts::P2shP2wsh(_) => "P2shP2wsh",
            WalletScripts::P2wsh(_) => "P2wsh",
            WalletScripts::P2trLegacy(_) => "P2trLegacy",
            WalletScripts::P2trMusig2(_) => "P2trMusig2",
        };
        f.write_str(name)
    }
}

impl WalletScripts {
    pub fn new(
        keys: &PubTriple,
        script_type: OutputScriptType,
        script_support: &OutputScriptSupport,
    ) -> Result<WalletScripts> {
        match script_type {
            OutputScriptType::P2sh => {
                script_support.assert_legacy()?;
                Ok(WalletScripts::P2sh(ScriptP2sh {
                    redeem_script: build_multisig_script_2_of_3(keys),
                }))
            }
            OutputScriptType::P2shP2wsh => {
                script_support.assert_segwit()?;
                let script = build_multisig_script_2_of_3(keys);
                Ok(WalletScripts::P2shP2wsh(ScriptP2shP2wsh {
                    redeem_script: script.to_p2wsh(),
                    witness_script: script,
                }))
            }
            OutputScriptType::P2wsh => {
                script_support.assert_segwit()?;
                Ok(WalletScripts::P2wsh(ScriptP2wsh {
                    witness_script: build_multisig_script_2_of_3(keys),
                }))
            }
            OutputScriptType::P2trLegacy => {
                script_support.assert_taproot()?;
                Ok(WalletScripts::P2trLegacy(ScriptP2tr::new(keys, false)?))
            }
            OutputScriptType::P2trMusig2 => {
                script_support.assert_taproot()?;
                Ok(WalletScripts::P2trMusig2(ScriptP2tr::new(keys, true)?))
            }
        }
    }

    pub fn from_wallet_keys(
        wallet_keys: &RootWalletKeys,
        chain: Chain,
        index: u32,
        script_support: &OutputScriptSupport,
    ) -> Result<WalletScripts> {
        let derived = wallet_keys.derive_for_chain_and_index(chain.value(), index)?;
        WalletScripts::new(&to_pub_triple(&derived), chain.script_type, script_support)
    }

    pub fn output_script(&self) -> ScriptBuf {
        match self {
            WalletScripts::P2sh(script) => script.redeem_script.to_p2sh(),
            WalletScripts::P2shP2wsh(script) => script.redeem_script.to_p2sh(),
            WalletScripts::P2wsh(script) => script.witness_script.to_p2wsh(),
            WalletScripts::P2trLegacy(script) | WalletScripts::P2trMusig2(script) => {
                script.output_script()
            }
        }
    }

    pub fn p2tr(&self) -> Option<&ScriptP2tr> {
        match self {
            WalletScripts::P2trLegacy(script) | WalletScripts::P2trMusig2(script) => Some(script),
            _ => None,
        }
    }
}

/// External chains receive, internal chains hold change.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Scope {
    External,
    Internal,
}

/// A script type paired with a scope. The value is the `{chain}` component of
/// `m/0/0/{chain}/{index}`: the script type base, plus one for change.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Chain {
    pub script_type: OutputScriptType,
    pub scope: Scope,
}

impl Chain {
    pub const fn new(script_type: OutputScriptType, scope: Scope) -> Self {
        Self { script_type, scope }
    }

    pub const fn value(&self) -> u32 {
        let base = match self.script_type {
            OutputScriptType::P2sh => 0,
            OutputScriptType::P2shP2wsh => 10,
            OutputScriptType::P2wsh => 20,
            OutputScriptType::P2trLegacy => 30,
            OutputScriptType::P2trMusig2 => 40,
        };
        match self.scope {
            Scope::External => base,
            Scope::Internal => base + 1,
        }
    }
}

impl TryFrom<u32> for Chain {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        let script_type = match value / 10 {
            0 if value < 2 => OutputScriptType::P2sh,
            1 => OutputScriptType::P2shP2wsh,
            2 => OutputScriptType::P2wsh,
            3 => OutputScriptType::P2trLegacy,
            4 => OutputScriptType::P2trMusig2,
            _ => return Err(Error::validation(format!("no chain for {}", value))),
        };
        let scope = match value % 10 {
            0 => Scope::External,
            1 => Scope::Internal,
            _ => return Err(Error::validation(format!("no chain for {}", value))),
        };
        Ok(Chain::new(script_type, scope))
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = u32::from_str(s)
            .map_err(|e| Error::validation(format!("invalid chain '{}': {}", s, e)))?;
        Chain::try_from(value)
    }
}

/// Script type of a wallet output, independent of scope.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OutputScriptType {
    P2sh,
    P2shP2wsh,
    P2wsh,
    P2trLegacy,
    P2trMusig2,
}

const ALL_SCRIPT_TYPES: [OutputScriptType; 5] = [
    OutputScriptType::P2sh,
    OutputScriptType::P2shP2wsh,
    OutputScriptType::P2wsh,
    OutputScriptType::P2trLegacy,
    OutputScriptType::P2trMusig2,
];

impl FromStr for OutputScriptType {
    type Err = Error;

    /// Input script type names map onto the output type they spend:
    /// `p2shP2pk` is p2sh, `p2trMusig2ScriptPath`/`p2trMusig2KeyPath` are p2trMusig2.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "p2sh" | "p2shP2pk" => Ok(OutputScriptType::P2sh),
            "p2shP2wsh" => Ok(OutputScriptType::P2shP2wsh),
            "p2wsh" => Ok(OutputScriptType::P2wsh),
            "p2tr" | "p2trLegacy" => Ok(OutputScriptType::P2trLegacy),
            "p2trMusig2" | "p2trMusig2ScriptPath" | "p2trMusig2KeyPath" => {
                Ok(OutputScriptType::P2trMusig2)
            }
            _ => Err(Error::validation(format!(
                "unknown script type '{}', expected one of p2sh, p2shP2wsh, p2wsh, p2trLegacy, p2trMusig2",
                s
            ))),
        }
    }
}

impl OutputScriptType {
    pub fn all() -> &'static [OutputScriptType; 5] {
        &ALL_SCRIPT_TYPES
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputScriptType::P2sh => "p2sh",
            OutputScriptType::P2shP2wsh => "p2shP2wsh",
            OutputScriptType::P2wsh => "p2wsh",
            OutputScriptType::P2trLegacy => "p2trLegacy",
            OutputScriptType::P2trMusig2 => "p2trMusig2",
        }
    }

    pub fn is_taproot(&self) -> bool {
        matches!(self, OutputScriptType::P2trLegacy | OutputScriptType::P2trMusig2)
    }
}

impl fmt::Display for OutputScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

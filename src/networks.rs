use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::psbt::SpendKind;

/// Chains the signer knows how to build scripts and addresses for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Network {
    Bitcoin,
    BitcoinTestnet3,
    BitcoinTestnet4,
    BitcoinSignet,
    Litecoin,
    LitecoinTestnet,
    Dogecoin,
    DogecoinTestnet,
    Zcash,
    ZcashTestnet,
}

pub const ALL_NETWORKS: [Network; 10] = [
    Network::Bitcoin,
    Network::BitcoinTestnet3,
    Network::BitcoinTestnet4,
    Network::BitcoinSignet,
    Network::Litecoin,
    Network::LitecoinTestnet,
    Network::Dogecoin,
    Network::DogecoinTestnet,
    Network::Zcash,
    Network::ZcashTestnet,
];

/// Which output script families a network accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputScriptSupport {
    pub segwit: bool,
    pub taproot: bool,
}

impl OutputScriptSupport {
    pub fn assert_legacy(&self) -> Result<()> {
        Ok(())
    }

    pub fn assert_segwit(&self) -> Result<()> {
        if !self.segwit {
            return Err(Error::validation("Network does not support segwit"));
        }
        Ok(())
    }

    pub fn assert_taproot(&self) -> Result<()> {
        if !self.taproot {
            return Err(Error::validation("Network does not support taproot"));
        }
        Ok(())
    }
}

impl Network {
    pub fn all() -> &'static [Network; 10] {
        &ALL_NETWORKS
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::BitcoinTestnet3 => "testnet",
            Network::BitcoinTestnet4 => "bitcoinTestnet4",
            Network::BitcoinSignet => "bitcoinPublicSignet",
            Network::Litecoin => "litecoin",
            Network::LitecoinTestnet => "litecoinTest",
            Network::Dogecoin => "dogecoin",
            Network::DogecoinTestnet => "dogecoinTest",
            Network::Zcash => "zcash",
            Network::ZcashTestnet => "zcashTest",
        }
    }

    /// The mainnet this network is a test network of (or itself).
    pub fn mainnet(&self) -> Network {
        match self {
            Network::Bitcoin
            | Network::BitcoinTestnet3
            | Network::BitcoinTestnet4
            | Network::BitcoinSignet => Network::Bitcoin,
            Network::Litecoin | Network::LitecoinTestnet => Network::Litecoin,
            Network::Dogecoin | Network::DogecoinTestnet => Network::Dogecoin,
            Network::Zcash | Network::ZcashTestnet => Network::Zcash,
        }
    }

    pub fn is_mainnet(&self) -> bool {
        self.mainnet() == *self
    }

    pub fn is_testnet(&self) -> bool {
        !self.is_mainnet()
    }

    pub fn output_script_support(&self) -> OutputScriptSupport {
        match self.mainnet() {
            Network::Bitcoin => OutputScriptSupport {
                segwit: true,
                taproot: true,
            },
            Network::Litecoin => OutputScriptSupport {
                segwit: true,
                taproot: false,
            },
            _ => OutputScriptSupport {
                segwit: false,
                taproot: false,
            },
        }
    }

    /// Whether an input of `kind` must carry the full previous transaction.
    ///
    /// Applies to non-segwit spends on every chain except Zcash, whose legacy inputs
    /// are handled like segwit inputs and only need `witness_utxo`.
    pub fn requires_non_witness_utxo(&self, kind: SpendKind) -> bool {
        let non_segwit = matches!(kind, SpendKind::P2sh | SpendKind::P2shP2pk);
        non_segwit && self.mainnet() != Network::Zcash
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    /// Accepts the network names returned by [`Network::as_str`] and the usual coin tickers.
    fn from_str(s: &str) -> Result<Self> {
        let network = match s {
            "bitcoin" | "btc" => Network::Bitcoin,
            "testnet" | "tbtc" => Network::BitcoinTestnet3,
            "bitcoinTestnet4" | "tbtc4" => Network::BitcoinTestnet4,
            "bitcoinPublicSignet" | "tbtcsig" => Network::BitcoinSignet,
            "litecoin" | "ltc" => Network::Litecoin,
            "litecoinTest" | "tltc" => Network::LitecoinTestnet,
            "dogecoin" | "doge" => Network::Dogecoin,
            "dogecoinTest" | "tdoge" => Network::DogecoinTestnet,
            "zcash" | "zec" => Network::Zcash,
            "zcashTest" | "tzec" => Network::ZcashTestnet,
            _ => {
                return Err(Error::validation(format!(
                    "Unknown network '{}'. Expected a network name (e.g. 'bitcoin', 'testnet') or coin name (e.g. 'btc', 'tbtc')",
                    s
                )))
            }
        };
        Ok(network)
    }
}

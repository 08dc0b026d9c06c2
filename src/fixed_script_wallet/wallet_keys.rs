use std::str::FromStr;

use crate::bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpub};
use crate::bitcoin::secp256k1::Secp256k1;
use crate::bitcoin::CompressedPublicKey;
use crate::error::{Error, Result};

pub type XpubTriple = [Xpub; 3];

pub type PubTriple = [CompressedPublicKey; 3];

pub fn to_pub_triple(xpubs: &XpubTriple) -> PubTriple {
    [xpubs[0].to_pub(), xpubs[1].to_pub(), xpubs[2].to_pub()]
}

pub fn derivation_path(prefix: &DerivationPath, chain: u32, index: u32) -> DerivationPath {
    prefix
        .child(ChildNumber::Normal { index: chain })
        .child(ChildNumber::Normal { index })
}

/// The user, backup and bitgo root keys of a 2-of-3 wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootWalletKeys {
    pub xpubs: XpubTriple,
    pub derivation_prefixes: [DerivationPath; 3],
}

impl RootWalletKeys {
    pub fn new_with_derivation_prefixes(
        xpubs: XpubTriple,
        derivation_prefixes: [DerivationPath; 3],
    ) -> Self {
        Self {
            xpubs,
            derivation_prefixes,
        }
    }

    pub fn new(xpubs: XpubTriple) -> Self {
        let prefix = DerivationPath::from(vec![ChildNumber::Normal { index: 0 }; 2]);
        Self::new_with_derivation_prefixes(xpubs, [prefix.clone(), prefix.clone(), prefix])
    }

    /// Parse three base58 xpubs in user, backup, bitgo order.
    pub fn from_xpub_strings(xpubs: &[&str; 3]) -> Result<Self> {
        Ok(Self::new([
            Xpub::from_str(xpubs[0])?,
            Xpub::from_str(xpubs[1])?,
            Xpub::from_str(xpubs[2])?,
        ]))
    }

    pub fn user_key(&self) -> &Xpub {
        &self.xpubs[0]
    }

    pub fn backup_key(&self) -> &Xpub {
        &self.xpubs[1]
    }

    pub fn bitgo_key(&self) -> &Xpub {
        &self.xpubs[2]
    }

    /// Role index (0 user, 1 backup, 2 bitgo) of the root key with `fingerprint`.
    pub fn index_of_fingerprint(&self, fingerprint: Fingerprint) -> Option<usize> {
        self.xpubs
            .iter()
            .position(|xpub| xpub.fingerprint() == fingerprint)
    }

    pub fn derive_for_chain_and_index(&self, chain: u32, index: u32) -> Result<XpubTriple> {
        let ctx = Secp256k1::verification_only();
        let derive = |i: usize| -> Result<Xpub> {
            let path = derivation_path(&self.derivation_prefixes[i], chain, index);
            Ok(self.xpubs[i].derive_pub(&ctx, &path)?)
        };
        Ok([derive(0)?, derive(1)?, derive(2)?])
    }
}

impl TryFrom<Vec<Xpub>> for RootWalletKeys {
    type Error = Error;

    fn try_from(xpubs: Vec<Xpub>) -> Result<Self> {
        let xpubs: XpubTriple = xpubs
            .try_into()
            .map_err(|v: Vec<Xpub>| Error::validation(format!("expected 3 xpubs, got {}", v.len())))?;
        Ok(Self::new(xpubs))
    }
}

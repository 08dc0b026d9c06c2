//! Locating an HD key's leaf key in an input's derivation maps.

use crate::bitcoin::bip32::{DerivationPath, Fingerprint, Xpriv, Xpub};
use crate::bitcoin::psbt::Input;
use crate::bitcoin::secp256k1::{self, Secp256k1, SecretKey};
use crate::bitcoin::CompressedPublicKey;
use crate::error::{Error, Result};

fn find_bip32_derivation_path(input: &Input, fingerprint: Fingerprint) -> Option<&DerivationPath> {
    input
        .bip32_derivation
        .values()
        .find(|(fp, _)| *fp == fingerprint)
        .map(|(_, path)| path)
}

fn find_tap_key_origins_path(input: &Input, fingerprint: Fingerprint) -> Option<&DerivationPath> {
    input
        .tap_key_origins
        .values()
        .find(|(_, (fp, _))| *fp == fingerprint)
        .map(|(_, (_, path))| path)
}

/// Derivation path recorded for keys descending from the key with `fingerprint`.
///
/// `bip32_derivation` is searched first, then `tap_key_origins`.
pub fn find_derivation_path(input: &Input, fingerprint: Fingerprint) -> Option<&DerivationPath> {
    find_bip32_derivation_path(input, fingerprint)
        .or_else(|| find_tap_key_origins_path(input, fingerprint))
}

/// Public key `xpub` signs this input with, or `None` when the input has no derivation for it.
pub fn derive_pubkey_from_input<C: secp256k1::Verification>(
    secp: &Secp256k1<C>,
    xpub: &Xpub,
    input: &Input,
) -> Result<Option<CompressedPublicKey>> {
    let Some(path) = find_derivation_path(input, xpub.fingerprint()) else {
        return Ok(None);
    };
    let derived = xpub.derive_pub(secp, path)?;
    Ok(Some(CompressedPublicKey(derived.public_key)))
}

/// Secret key `xpriv` signs this input with.
///
/// The derived key must be the one the derivation map records for that path.
pub fn derive_secret_from_input<C: secp256k1::Signing>(
    secp: &Secp256k1<C>,
    xpriv: &Xpriv,
    input: &Input,
) -> Result<SecretKey> {
    let fingerprint = xpriv.fingerprint(secp);
    if let Some((pubkey, (_, path))) = input
        .bip32_derivation
        .iter()
        .find(|(_, (fp, _))| *fp == fingerprint)
    {
        let derived = xpriv.derive_priv(secp, path)?;
        if derived.private_key.public_key(secp) != *pubkey {
            return Err(Error::validation(format!(
                "key derived at {} does not match bip32_derivation",
                path
            )));
        }
        return Ok(derived.private_key);
    }
    if let Some((xonly, (_, (_, path)))) = input
        .tap_key_origins
        .iter()
        .find(|(_, (_, (fp, _)))| *fp == fingerprint)
    {
        let derived = xpriv.derive_priv(secp, path)?;
        if derived.private_key.x_only_public_key(secp).0 != *xonly {
            return Err(Error::validation(format!(
                "key derived at {} does not match tap_key_origins",
                path
            )));
        }
        return Ok(derived.private_key);
    }
    Err(Error::validation(format!(
        "input has no derivation for key with fingerprint {}",
        fingerprint
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_psbt, InputShape};

    #[test]
    fn test_derive_from_bip32_derivation() {
        let fixture = build_psbt(&[InputShape::P2wsh]);
        let secp = Secp256k1::new();
        let input = &fixture.psbt.inputs[0];
        for (i, xpub) in fixture.wallet_keys.xpubs.iter().enumerate() {
            let derived = derive_pubkey_from_input(&secp, xpub, input).unwrap().unwrap();
            assert_eq!(derived, fixture.pub_triple(0)[i]);
            let secret = derive_secret_from_input(&secp, &fixture.xprivs[i], input).unwrap();
            assert_eq!(secret.public_key(&secp), derived.0);
        }
    }

    #[test]
    fn test_derive_from_tap_key_origins() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let secp = Secp256k1::new();
        let input = &fixture.psbt.inputs[0];
        let [user, backup, bitgo] = fixture.wallet_keys.xpubs;
        assert_eq!(
            derive_pubkey_from_input(&secp, &user, input).unwrap(),
            Some(fixture.pub_triple(0)[0])
        );
        assert_eq!(
            derive_pubkey_from_input(&secp, &bitgo, input).unwrap(),
            Some(fixture.pub_triple(0)[2])
        );
        // the backup key has no say in a key-path spend
        assert_eq!(derive_pubkey_from_input(&secp, &backup, input).unwrap(), None);
        assert!(derive_secret_from_input(&secp, &fixture.xprivs[1], input).is_err());
    }
}

//! Wallet PSBTs: per-input classification, signing, validation and finalization.
//!
//! A [`WalletPsbt`] wraps a [`Psbt`] and dispatches every per-input operation to the
//! strategy for that input's [`SpendKind`]. Classification is recomputed on each call, so
//! an input moves through its states (unsigned, partially signed, fully signed, finalized)
//! only by the records it carries.

mod derivation;
mod finalize;
mod legacy_txformat;
mod musig2_input;
pub mod propkv;
pub(crate) mod sighash;
mod sign;
mod spend_kind;
mod validate;

pub use derivation::{derive_pubkey_from_input, derive_secret_from_input, find_derivation_path};
pub use sighash::SighashPolicy;
pub use spend_kind::{classify, SpendKind};

use ::musig2::PubNonce;
use tracing::{debug, warn};

use crate::bitcoin::bip32::{Xpriv, Xpub};
use crate::bitcoin::psbt::Psbt;
use crate::bitcoin::secp256k1::{Secp256k1, SecretKey};
use crate::bitcoin::{CompressedPublicKey, Transaction, Txid};
use crate::error::{Error, Result};
use crate::musig2::{Musig2NonceStore, NonceOptions};
use crate::Network;

use finalize::is_finalized;
use sighash::spent_output;

#[derive(Debug)]
pub struct WalletPsbt {
    psbt: Psbt,
    network: Network,
    sighash_policy: SighashPolicy,
    nonce_store: Musig2NonceStore,
}

impl WalletPsbt {
    pub fn new(psbt: Psbt, network: Network) -> Result<WalletPsbt> {
        Ok(WalletPsbt {
            psbt,
            network,
            sighash_policy: SighashPolicy::default(),
            nonce_store: Musig2NonceStore::new()?,
        })
    }

    pub fn with_sighash_policy(mut self, sighash_policy: SighashPolicy) -> WalletPsbt {
        self.sighash_policy = sighash_policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_nonce_store(mut self, nonce_store: Musig2NonceStore) -> WalletPsbt {
        self.nonce_store = nonce_store;
        self
    }

    pub fn deserialize(bytes: &[u8], network: Network) -> Result<WalletPsbt> {
        let psbt = Psbt::deserialize(bytes).map_err(|e| Error::UnparsableInput(e.to_string()))?;
        WalletPsbt::new(psbt, network)
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.psbt.serialize()
    }

    pub fn psbt(&self) -> &Psbt {
        &self.psbt
    }

    /// Direct access to the document. Secret nonces already handed out stay bound to the
    /// messages they were created for.
    pub fn psbt_mut(&mut self) -> &mut Psbt {
        &mut self.psbt
    }

    pub fn into_psbt(self) -> Psbt {
        self.psbt
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn sighash_policy(&self) -> &SighashPolicy {
        &self.sighash_policy
    }

    pub fn unsigned_txid(&self) -> Txid {
        self.psbt.unsigned_tx.compute_txid()
    }

    pub fn input_count(&self) -> usize {
        self.psbt.inputs.len()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.psbt.inputs.len() {
            return Err(Error::InputIndexOutOfBounds {
                index,
                count: self.psbt.inputs.len(),
            });
        }
        Ok(())
    }

    pub fn is_input_finalized(&self, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(is_finalized(&self.psbt, index))
    }

    pub fn classify_input(&self, index: usize) -> Result<SpendKind> {
        self.check_index(index)?;
        let prevout = spent_output(&self.psbt, index).ok();
        classify(
            &self.psbt.inputs[index],
            prevout.as_ref().map(|txout| txout.script_pubkey.as_script()),
        )
        .map_err(|e| e.at_input(index))
    }

    /// Zcash commits to ZIP-243 digests, which this crate does not compute.
    fn reject_unsupported_sighash(&self) -> Result<()> {
        if self.network.mainnet() == Network::Zcash {
            return Err(Error::state(format!(
                "signatures on {} inputs are not supported",
                self.network
            )));
        }
        Ok(())
    }

    /// Classification of an input that may still receive signatures.
    fn signable_input(&self, index: usize) -> Result<SpendKind> {
        if self.is_input_finalized(index)? {
            return Err(Error::state("input is already finalized").at_input(index));
        }
        let kind = self.classify_input(index)?;
        let check = || -> Result<()> {
            self.reject_unsupported_sighash()?;
            if self.network.requires_non_witness_utxo(kind)
                && self.psbt.inputs[index].non_witness_utxo.is_none()
            {
                return Err(Error::validation(format!(
                    "{} input on {} requires non_witness_utxo",
                    kind, self.network
                )));
            }
            Ok(())
        };
        check().map_err(|e| e.at_input(index))?;
        Ok(kind)
    }

    fn require_kind(
        index: usize,
        kind: SpendKind,
        allowed: &[SpendKind],
        operation: &str,
    ) -> Result<()> {
        if !allowed.contains(&kind) {
            return Err(Error::state(format!(
                "{} is not supported for {} inputs",
                operation, kind
            ))
            .at_input(index));
        }
        Ok(())
    }

    /// ECDSA-sign a p2sh, p2sh-p2wsh, p2wsh or p2sh-p2pk input.
    pub fn sign_input(&mut self, index: usize, secret: &SecretKey) -> Result<()> {
        let kind = self.signable_input(index)?;
        Self::require_kind(
            index,
            kind,
            &[
                SpendKind::P2sh,
                SpendKind::P2shP2wsh,
                SpendKind::P2wsh,
                SpendKind::P2shP2pk,
            ],
            "ECDSA signing",
        )?;
        let sighash_type = self
            .sighash_policy
            .check_legacy(&self.psbt.inputs[index])
            .map_err(|e| e.at_input(index))?;
        sign::sign_legacy_input(&mut self.psbt, index, kind, secret, sighash_type)
            .map_err(|e| e.at_input(index))?;
        debug!(input_index = index, spend_kind = %kind, "signed input");
        Ok(())
    }

    /// Secret key `xpriv` signs input `index` with. Finalized inputs have no derivations
    /// left, so they are rejected first.
    fn derive_secret(&self, index: usize, xpriv: &Xpriv) -> Result<SecretKey> {
        self.signable_input(index)?;
        let secp = Secp256k1::new();
        derive_secret_from_input(&secp, xpriv, &self.psbt.inputs[index])
            .map_err(|e| e.at_input(index))
    }

    pub fn sign_input_hd(&mut self, index: usize, xpriv: &Xpriv) -> Result<()> {
        let secret = self.derive_secret(index, xpriv)?;
        self.sign_input(index, &secret)
    }

    /// Schnorr-sign a script-path input, or the key path of a single-key taproot input.
    pub fn sign_taproot_input(&mut self, index: usize, secret: &SecretKey) -> Result<()> {
        let kind = self.signable_input(index)?;
        Self::require_kind(
            index,
            kind,
            &[SpendKind::TaprootScriptPath, SpendKind::TaprootGeneric],
            "single-key Schnorr signing",
        )?;
        let sighash_type = self
            .sighash_policy
            .check_taproot(&self.psbt.inputs[index])
            .map_err(|e| e.at_input(index))?;
        let result = if kind == SpendKind::TaprootScriptPath {
            sign::sign_taproot_script_path(&mut self.psbt, index, secret, sighash_type)
        } else {
            sign::sign_taproot_key_path_single(&mut self.psbt, index, secret, sighash_type)
        };
        result.map_err(|e| e.at_input(index))?;
        debug!(input_index = index, spend_kind = %kind, "signed input");
        Ok(())
    }

    pub fn sign_taproot_input_hd(&mut self, index: usize, xpriv: &Xpriv) -> Result<()> {
        let secret = self.derive_secret(index, xpriv)?;
        self.sign_taproot_input(index, &secret)
    }

    fn musig2_input(&self, index: usize, operation: &str) -> Result<()> {
        let kind = self.signable_input(index)?;
        Self::require_kind(index, kind, &[SpendKind::TaprootKeyPath], operation)
    }

    /// Record the public nonce of the participant holding `secret`.
    pub fn set_input_musig2_nonce(
        &mut self,
        index: usize,
        secret: &SecretKey,
        options: NonceOptions,
    ) -> Result<PubNonce> {
        self.musig2_input(index, "setting a MuSig2 nonce")?;
        let sighash_type = self
            .sighash_policy
            .check_taproot(&self.psbt.inputs[index])
            .map_err(|e| e.at_input(index))?;
        let nonce = musig2_input::set_nonce(
            &mut self.psbt,
            index,
            &mut self.nonce_store,
            secret,
            options,
            sighash_type,
        )
        .map_err(|e| e.at_input(index))?;
        debug!(
            input_index = index,
            deterministic = options.deterministic,
            "set musig2 nonce"
        );
        Ok(nonce)
    }

    pub fn set_input_musig2_nonce_hd(
        &mut self,
        index: usize,
        xpriv: &Xpriv,
        options: NonceOptions,
    ) -> Result<PubNonce> {
        let secret = self.derive_secret(index, xpriv)?;
        self.set_input_musig2_nonce(index, &secret, options)
    }

    /// Add a MuSig2 partial signature. Both participants' nonces must be recorded.
    pub fn sign_taproot_musig2_input(&mut self, index: usize, secret: &SecretKey) -> Result<()> {
        self.musig2_input(index, "MuSig2 signing")?;
        let sighash_type = self
            .sighash_policy
            .check_taproot(&self.psbt.inputs[index])
            .map_err(|e| e.at_input(index))?;
        musig2_input::sign(
            &mut self.psbt,
            index,
            &mut self.nonce_store,
            secret,
            sighash_type,
        )
        .map_err(|e| e.at_input(index))?;
        debug!(input_index = index, spend_kind = %SpendKind::TaprootKeyPath, "signed input");
        Ok(())
    }

    pub fn sign_taproot_musig2_input_hd(&mut self, index: usize, xpriv: &Xpriv) -> Result<()> {
        let secret = self.derive_secret(index, xpriv)?;
        self.sign_taproot_musig2_input(index, &secret)
    }

    /// Sign input `index` with the strategy its spend kind calls for.
    pub fn sign_any_input_hd(&mut self, index: usize, xpriv: &Xpriv) -> Result<()> {
        match self.classify_input(index)? {
            SpendKind::TaprootKeyPath => self.sign_taproot_musig2_input_hd(index, xpriv),
            SpendKind::TaprootScriptPath | SpendKind::TaprootGeneric => {
                self.sign_taproot_input_hd(index, xpriv)
            }
            SpendKind::P2sh | SpendKind::P2shP2wsh | SpendKind::P2wsh | SpendKind::P2shP2pk => {
                self.sign_input_hd(index, xpriv)
            }
        }
    }

    /// Sign every input `xpriv` can sign, returning the indices it signed.
    ///
    /// Per-input failures are logged and skipped; the call fails only when no input was
    /// signed. MuSig2 inputs are signed only when both nonces are already recorded.
    pub fn sign_all_inputs_hd(&mut self, xpriv: &Xpriv) -> Result<Vec<usize>> {
        let mut signed = Vec::new();
        let mut errors = Vec::new();
        for index in 0..self.psbt.inputs.len() {
            match self.sign_any_input_hd(index, xpriv) {
                Ok(()) => signed.push(index),
                Err(e) => {
                    warn!(input_index = index, error = %e, "could not sign input");
                    errors.push((index, e));
                }
            }
        }
        if signed.is_empty() {
            return Err(Error::NoInputSucceeded {
                operation: "sign",
                errors,
            });
        }
        Ok(signed)
    }

    /// Whether the signatures on input `index` (restricted to `pubkey` when given) are valid.
    pub fn validate_signatures_of_input(
        &self,
        index: usize,
        pubkey: Option<&CompressedPublicKey>,
    ) -> Result<bool> {
        self.check_index(index)?;
        self.reject_unsupported_sighash()
            .map_err(|e| e.at_input(index))?;
        let kind = if is_finalized(&self.psbt, index) {
            None
        } else {
            Some(self.classify_input(index)?)
        };
        validate::validate_signatures_of_input(&self.psbt, index, kind, pubkey)
            .map_err(|e| e.at_input(index))
    }

    /// One flag per root key: did that key produce a valid signature on input `index`?
    ///
    /// Flags follow the order of `root_keys`, so passing `[user, backup, bitgo]` yields
    /// role-ordered flags. Without `root_keys` the document's global xpubs are used in the
    /// order of the xpub map (sorted by `Xpub`), which carries no role information.
    pub fn get_signature_validation_array(
        &self,
        index: usize,
        root_keys: Option<&[Xpub]>,
    ) -> Result<[bool; 3]> {
        self.check_index(index)?;
        self.reject_unsupported_sighash()
            .map_err(|e| e.at_input(index))?;
        let global_keys: Vec<Xpub>;
        let root_keys = match root_keys {
            Some(keys) => keys,
            None => {
                global_keys = self.psbt.xpub.keys().copied().collect();
                &global_keys
            }
        };
        let kind = if is_finalized(&self.psbt, index) {
            None
        } else {
            Some(self.classify_input(index)?)
        };
        validate::get_signature_validation_array(&self.psbt, index, kind, root_keys)
            .map_err(|e| e.at_input(index))
    }

    /// Number of signatures on input `index`, without verifying them.
    pub fn signature_count(&self, index: usize) -> Result<usize> {
        self.check_index(index)?;
        validate::signature_count(&self.psbt, index).map_err(|e| e.at_input(index))
    }

    pub fn finalize_input(&mut self, index: usize) -> Result<()> {
        if self.is_input_finalized(index)? {
            return Err(Error::state("input is already finalized").at_input(index));
        }
        let kind = self.classify_input(index)?;
        self.reject_unsupported_sighash()
            .map_err(|e| e.at_input(index))?;
        finalize::finalize_input(&mut self.psbt, index, kind).map_err(|e| e.at_input(index))?;
        debug!(input_index = index, spend_kind = %kind, "finalized input");
        Ok(())
    }

    /// Finalize every input that can be, returning the indices finalized so far.
    ///
    /// Inputs that were already finalized count as finalized. Fails only when no input
    /// ends up finalized.
    pub fn finalize_all_inputs(&mut self) -> Result<Vec<usize>> {
        if self.psbt.inputs.is_empty() {
            return Err(Error::validation("transaction has no inputs"));
        }
        let mut finalized = Vec::new();
        let mut errors = Vec::new();
        for index in 0..self.psbt.inputs.len() {
            if is_finalized(&self.psbt, index) {
                finalized.push(index);
                continue;
            }
            match self.finalize_input(index) {
                Ok(()) => finalized.push(index),
                Err(e) => {
                    warn!(input_index = index, error = %e, "could not finalize input");
                    errors.push((index, e));
                }
            }
        }
        if finalized.is_empty() {
            return Err(Error::NoInputSucceeded {
                operation: "finalize",
                errors,
            });
        }
        Ok(finalized)
    }

    /// The signed transaction. Every input must be finalized.
    pub fn extract_transaction(&self) -> Result<Transaction> {
        if let Some(index) = (0..self.psbt.inputs.len()).find(|i| !is_finalized(&self.psbt, *i)) {
            return Err(Error::state("input is not finalized").at_input(index));
        }
        Ok(self.psbt.clone().extract_tx_unchecked_fee_rate())
    }

    /// Transaction with each 2-of-3 input carrying its signatures at their key positions
    /// and `OP_0` for the keys that have not signed.
    pub fn extract_half_signed_legacy_transaction(&self) -> Result<Transaction> {
        legacy_txformat::build_half_signed_legacy_tx(&self.psbt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcoin::psbt::PsbtSighashType;
    use crate::bitcoin::sighash::EcdsaSighashType;
    use crate::bitcoin::{PublicKey, ScriptBuf};
    use crate::script_pattern::{parse_signature_script, ScriptDescriptor, SignatureSlot};
    use crate::test_utils::{build_psbt, Fixture, InputShape, INPUT_VALUE};
    use crate::verify::{get_signature_verifications, SignatureVerification, Signer};
    use crate::ErrorKind;
    use rstest::rstest;

    fn wallet_psbt(fixture: &Fixture) -> WalletPsbt {
        WalletPsbt::new(fixture.psbt.clone(), fixture.network)
            .unwrap()
            .with_nonce_store(Musig2NonceStore::with_salt([3u8; 32]))
    }

    fn matched_signers(verifications: &[SignatureVerification]) -> Vec<Signer> {
        verifications
            .iter()
            .filter_map(|v| match v {
                SignatureVerification::Matched { signer, .. } => Some(*signer),
                SignatureVerification::Unmatched => None,
            })
            .collect()
    }

    #[rstest]
    #[case(InputShape::P2sh)]
    #[case(InputShape::P2shP2wsh)]
    #[case(InputShape::P2wsh)]
    fn test_multisig_sign_validate_finalize(#[case] shape: InputShape) {
        let fixture = build_psbt(&[shape]);
        let [user, backup, bitgo] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);

        assert_eq!(psbt.signature_count(0).unwrap(), 0);
        assert_eq!(
            psbt.get_signature_validation_array(0, None).unwrap(),
            [false, false, false]
        );

        psbt.sign_input_hd(0, &user).unwrap();
        assert_eq!(psbt.signature_count(0).unwrap(), 1);
        assert!(psbt.validate_signatures_of_input(0, None).unwrap());
        let roots = fixture.wallet_keys.xpubs;
        assert_eq!(
            psbt.get_signature_validation_array(0, Some(&roots)).unwrap(),
            [true, false, false]
        );

        // a second signature by the same key is rejected
        let err = psbt.sign_input_hd(0, &user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        psbt.sign_input_hd(0, &bitgo).unwrap();
        assert_eq!(
            psbt.get_signature_validation_array(0, Some(&roots)).unwrap(),
            [true, false, true]
        );
        assert!(!psbt
            .validate_signatures_of_input(0, Some(&fixture.pub_triple(0)[1]))
            .unwrap());

        psbt.finalize_input(0).unwrap();
        assert!(psbt.is_input_finalized(0).unwrap());
        let err = psbt.sign_input_hd(0, &backup).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        let tx = psbt.extract_transaction().unwrap();
        let verifications =
            get_signature_verifications(&tx, 0, INPUT_VALUE, Some(&fixture.prevouts())).unwrap();
        assert_eq!(verifications.len(), 2);
        assert_eq!(matched_signers(&verifications).len(), 2);
    }

    #[test]
    fn test_half_signed_p2wsh_places_signature_by_key() {
        let fixture = build_psbt(&[InputShape::P2wsh]);
        let [user, _, _] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);
        assert!(psbt.extract_half_signed_legacy_transaction().is_err());
        psbt.sign_input_hd(0, &user).unwrap();

        let tx = psbt.extract_half_signed_legacy_transaction().unwrap();
        let descriptor = parse_signature_script(&tx.input[0].script_sig, &tx.input[0].witness)
            .unwrap();
        assert!(matches!(descriptor, ScriptDescriptor::P2wsh2of3(_)));
        let multisig = descriptor.multisig().unwrap();
        assert!(!multisig.signatures[0].is_placeholder());
        assert_eq!(multisig.signatures[1], SignatureSlot::Placeholder);
        assert_eq!(multisig.signatures[2], SignatureSlot::Placeholder);

        let verifications =
            get_signature_verifications(&tx, 0, INPUT_VALUE, Some(&fixture.prevouts())).unwrap();
        assert_eq!(
            matched_signers(&verifications),
            vec![Signer::Ecdsa(fixture.pub_triple(0)[0].into())]
        );
    }

    #[test]
    fn test_p2wsh_signed_by_first_and_third_key() {
        let fixture = build_psbt(&[InputShape::P2wsh]);
        let [user, _, bitgo] = fixture.secrets(0);
        let keys = fixture.pub_triple(0);
        let mut psbt = wallet_psbt(&fixture);
        psbt.sign_input(0, &user).unwrap();
        psbt.sign_input(0, &bitgo).unwrap();

        let tx = psbt.extract_half_signed_legacy_transaction().unwrap();
        let descriptor = parse_signature_script(&tx.input[0].script_sig, &tx.input[0].witness)
            .unwrap();
        let multisig = descriptor.multisig().unwrap();
        assert_eq!(multisig.public_keys, keys.map(PublicKey::from));
        assert!(!multisig.signatures[0].is_placeholder());
        assert!(multisig.signatures[1].is_placeholder());
        assert!(!multisig.signatures[2].is_placeholder());

        psbt.finalize_input(0).unwrap();
        let tx = psbt.extract_transaction().unwrap();
        let signers = matched_signers(
            &get_signature_verifications(&tx, 0, INPUT_VALUE, None).unwrap(),
        );
        assert_eq!(
            signers,
            vec![Signer::Ecdsa(keys[0].into()), Signer::Ecdsa(keys[2].into())]
        );
    }

    #[test]
    fn test_p2sh_p2pk_sign_and_finalize() {
        let fixture = build_psbt(&[InputShape::P2shP2pk]);
        let [user, backup, _] = fixture.secrets(0);
        let mut psbt = wallet_psbt(&fixture);
        let err = psbt.sign_input(0, &backup).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        psbt.sign_input(0, &user).unwrap();
        assert!(psbt.validate_signatures_of_input(0, None).unwrap());
        psbt.finalize_input(0).unwrap();
        let tx = psbt.extract_transaction().unwrap();
        let verifications = get_signature_verifications(&tx, 0, INPUT_VALUE, None).unwrap();
        assert_eq!(matched_signers(&verifications).len(), 1);
    }

    #[rstest]
    #[case(InputShape::P2trLegacyScriptPath, [0, 2])]
    #[case(InputShape::P2trMusig2ScriptPath, [0, 1])]
    fn test_script_path_witness_follows_leaf_key_order(
        #[case] shape: InputShape,
        #[case] signers: [usize; 2],
    ) {
        let fixture = build_psbt(&[shape]);
        let secrets = fixture.secrets(0);
        let keys = fixture.pub_triple(0);
        let mut psbt = wallet_psbt(&fixture);

        // signing order does not matter
        psbt.sign_taproot_input(0, &secrets[signers[1]]).unwrap();
        assert!(psbt.validate_signatures_of_input(0, None).unwrap());
        psbt.sign_taproot_input(0, &secrets[signers[0]]).unwrap();
        let mut expected = [false; 3];
        expected[signers[0]] = true;
        expected[signers[1]] = true;
        let roots = fixture.wallet_keys.xpubs;
        assert_eq!(
            psbt.get_signature_validation_array(0, Some(&roots)).unwrap(),
            expected
        );
        // without explicit keys the flags follow the xpub map, not wallet roles
        let fallback = psbt.get_signature_validation_array(0, None).unwrap();
        let in_map_order: Vec<bool> = psbt
            .psbt()
            .xpub
            .keys()
            .map(|xpub| {
                let role = roots.iter().position(|root| root == xpub).unwrap();
                expected[role]
            })
            .collect();
        assert_eq!(fallback.to_vec(), in_map_order);

        let outside = (0..3).find(|i| !signers.contains(i)).unwrap();
        assert!(psbt.sign_taproot_input(0, &secrets[outside]).is_err());

        psbt.finalize_input(0).unwrap();
        let input = &psbt.psbt().inputs[0];
        assert_eq!(input.tap_script_sigs.len(), 2);
        let witness = input.final_script_witness.clone().unwrap();
        assert_eq!(witness.len(), 4);

        let descriptor = parse_signature_script(&ScriptBuf::new(), &witness).unwrap();
        let ScriptDescriptor::TaprootScriptPath(path) = descriptor else {
            panic!("expected a script-path spend");
        };
        let xonly = |i: usize| keys[i].0.x_only_public_key().0;
        assert_eq!(path.public_keys, [xonly(signers[0]), xonly(signers[1])]);
        // the witness carries the second key's signature first
        assert_eq!(witness.nth(0), path.signatures[1].as_bytes());
        assert_eq!(witness.nth(1), path.signatures[0].as_bytes());

        let tx = psbt.extract_transaction().unwrap();
        let prevouts = fixture.prevouts();
        let verifications =
            get_signature_verifications(&tx, 0, INPUT_VALUE, Some(&prevouts)).unwrap();
        assert_eq!(
            matched_signers(&verifications),
            vec![
                Signer::Schnorr(xonly(signers[0])),
                Signer::Schnorr(xonly(signers[1]))
            ]
        );
        // taproot verification needs the prevouts
        assert!(get_signature_verifications(&tx, 0, INPUT_VALUE, None).is_err());
    }

    #[test]
    fn test_key_path_musig2_with_deterministic_second_nonce() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let [user, backup, bitgo] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);

        assert!(psbt.sign_taproot_input_hd(0, &user).is_err());
        psbt.set_input_musig2_nonce_hd(0, &user, NonceOptions::default())
            .unwrap();
        psbt.set_input_musig2_nonce_hd(0, &bitgo, NonceOptions::deterministic())
            .unwrap();
        assert!(psbt
            .set_input_musig2_nonce_hd(0, &backup, NonceOptions::default())
            .is_err());

        psbt.sign_taproot_musig2_input_hd(0, &user).unwrap();
        assert_eq!(
            psbt.get_signature_validation_array(0, Some(&fixture.wallet_keys.xpubs))
                .unwrap(),
            [true, false, false]
        );
        psbt.sign_taproot_musig2_input_hd(0, &bitgo).unwrap();
        assert!(psbt.validate_signatures_of_input(0, None).unwrap());
        assert_eq!(psbt.signature_count(0).unwrap(), 2);

        psbt.finalize_input(0).unwrap();
        let input = &psbt.psbt().inputs[0];
        assert!(input.proprietary.is_empty());
        assert_eq!(input.final_script_witness.as_ref().unwrap().len(), 1);
        // the aggregate verifies only against the tweaked output key, which no root key derives
        assert_eq!(psbt.signature_count(0).unwrap(), 1);
        assert_eq!(
            psbt.get_signature_validation_array(0, Some(&fixture.wallet_keys.xpubs))
                .unwrap(),
            [false, false, false]
        );

        let tx = psbt.extract_transaction().unwrap();
        let prevouts = fixture.prevouts();
        let output_key = crate::bitcoin::XOnlyPublicKey::from_slice(
            &prevouts[0].script_pubkey.as_bytes()[2..34],
        )
        .unwrap();
        let verifications =
            get_signature_verifications(&tx, 0, INPUT_VALUE, Some(&prevouts)).unwrap();
        assert_eq!(
            matched_signers(&verifications),
            vec![Signer::Schnorr(output_key)]
        );
    }

    #[test]
    fn test_sign_all_inputs_hd_tolerates_unsignable_inputs() {
        let fixture = build_psbt(&[
            InputShape::P2sh,
            InputShape::P2trMusig2KeyPath,
            InputShape::P2trMusig2ScriptPath,
        ]);
        let [user, backup, bitgo] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);

        // no nonces yet, so the key-path input is skipped
        assert_eq!(psbt.sign_all_inputs_hd(&user).unwrap(), vec![0, 2]);
        // bitgo is not in the user/backup leaf
        assert_eq!(psbt.sign_all_inputs_hd(&bitgo).unwrap(), vec![0]);
        assert_eq!(psbt.sign_all_inputs_hd(&backup).unwrap(), vec![2]);

        assert_eq!(psbt.finalize_all_inputs().unwrap(), vec![0, 2]);
        let err = psbt.extract_transaction().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.to_string().starts_with("input 1:"));
    }

    #[test]
    fn test_sign_all_inputs_hd_fails_when_nothing_signed() {
        let fixture = build_psbt(&[InputShape::P2trMusig2KeyPath]);
        let [_, backup, _] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);
        let err = psbt.sign_all_inputs_hd(&backup).unwrap_err();
        assert!(matches!(
            err,
            Error::NoInputSucceeded {
                operation: "sign",
                ..
            }
        ));
    }

    #[test]
    fn test_finalize_all_inputs_requires_one_success() {
        let fixture = build_psbt(&[InputShape::P2wsh, InputShape::P2trMusig2KeyPath]);
        let mut psbt = wallet_psbt(&fixture);
        let err = psbt.finalize_all_inputs().unwrap_err();
        match err {
            Error::NoInputSucceeded { errors, .. } => assert_eq!(errors.len(), 2),
            e => panic!("unexpected error {}", e),
        }
    }

    #[test]
    fn test_input_index_out_of_bounds() {
        let fixture = build_psbt(&[InputShape::P2wsh]);
        let [user, _, _] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);
        assert!(matches!(
            psbt.sign_input_hd(1, &user).unwrap_err(),
            Error::InputIndexOutOfBounds { index: 1, count: 1 }
        ));
        assert!(psbt.signature_count(5).is_err());
    }

    #[test]
    fn test_disallowed_sighash_is_rejected() {
        let mut fixture = build_psbt(&[InputShape::P2wsh]);
        fixture.psbt.inputs[0].sighash_type =
            Some(PsbtSighashType::from(EcdsaSighashType::SinglePlusAnyoneCanPay));
        let [user, _, _] = fixture.secrets(0);
        let mut psbt = wallet_psbt(&fixture);
        let err = psbt.sign_input(0, &user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let policy = SighashPolicy {
            legacy: vec![EcdsaSighashType::SinglePlusAnyoneCanPay],
            ..SighashPolicy::default()
        };
        let mut psbt = wallet_psbt(&fixture).with_sighash_policy(policy);
        psbt.sign_input(0, &user).unwrap();
        assert!(psbt.validate_signatures_of_input(0, None).unwrap());
    }

    #[test]
    fn test_non_witness_utxo_required_outside_zcash() {
        let mut fixture = build_psbt(&[InputShape::P2sh]);
        let tx = fixture.psbt.inputs[0].non_witness_utxo.take().unwrap();
        fixture.psbt.inputs[0].witness_utxo = Some(tx.output[0].clone());
        let [user, _, _] = fixture.secrets(0);

        let mut psbt = wallet_psbt(&fixture);
        let err = psbt.sign_input(0, &user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Zcash accepts witness_utxo but its sighash is not computed here
        let mut psbt = WalletPsbt::new(fixture.psbt.clone(), Network::Zcash).unwrap();
        let err = psbt.sign_input(0, &user).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn test_serialize_round_trip() {
        use base64::prelude::*;

        let fixture = build_psbt(&[InputShape::P2wsh, InputShape::P2trMusig2KeyPath]);
        let [user, _, _] = fixture.xprivs;
        let mut psbt = wallet_psbt(&fixture);
        psbt.sign_input_hd(0, &user).unwrap();
        psbt.set_input_musig2_nonce_hd(1, &user, NonceOptions::default())
            .unwrap();

        // PSBTs travel between signers as base64
        let encoded = BASE64_STANDARD.encode(psbt.serialize());
        let bytes = BASE64_STANDARD.decode(encoded).unwrap();
        let parsed = WalletPsbt::deserialize(&bytes, Network::Bitcoin).unwrap();
        assert_eq!(parsed.psbt(), psbt.psbt());
        assert_eq!(parsed.unsigned_txid(), psbt.unsigned_txid());
        assert!(WalletPsbt::deserialize(&bytes[..10], Network::Bitcoin).is_err());
    }
}

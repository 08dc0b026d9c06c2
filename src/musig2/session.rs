use ::musig2::secp::Point;
use ::musig2::{AggNonce, BinaryEncoding, KeyAggContext, LiftedSignature, PartialSignature, PubNonce};

use crate::bitcoin::hashes::hex::DisplayHex;
use crate::bitcoin::secp256k1::{schnorr, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use crate::bitcoin::sighash::TapSighashType;
use crate::bitcoin::taproot;
use crate::bitcoin::CompressedPublicKey;

use super::nonce::{deterministic_nonce, Musig2NonceStore};
use super::records::Musig2PartialSig;
use super::{key_agg_context, to_point, Musig2Error};

/// Everything the two signers agree on before producing partial signatures.
///
/// Built from data already in the document, so it can be recreated at any step.
pub struct Musig2Session {
    key_agg_ctx: KeyAggContext,
    pub_keys: [CompressedPublicKey; 2],
    pub_nonces: [PubNonce; 2],
    agg_nonce: AggNonce,
    message: [u8; 32],
    tap_output_key: XOnlyPublicKey,
}

impl std::fmt::Debug for Musig2Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Musig2Session")
            .field("pub_keys", &self.pub_keys)
            .field("message", &self.message.to_lower_hex_string())
            .field("tap_output_key", &self.tap_output_key)
            .finish_non_exhaustive()
    }
}

impl Musig2Session {
    /// `pub_nonces` are ordered like `pub_keys`.
    pub fn new(
        pub_nonces: [PubNonce; 2],
        pub_keys: [CompressedPublicKey; 2],
        message: [u8; 32],
        internal_key: &XOnlyPublicKey,
        merkle_root: Option<[u8; 32]>,
    ) -> Result<Self, Musig2Error> {
        let ctx = key_agg_context(&pub_keys)?;
        let aggregate: Point = ctx.aggregated_pubkey();
        if aggregate.serialize_xonly() != internal_key.serialize() {
            return Err(Musig2Error::TapInternalKeyMismatch {
                expected: internal_key.serialize().to_lower_hex_string(),
                got: aggregate.serialize_xonly().to_lower_hex_string(),
            });
        }
        let key_agg_ctx = match merkle_root {
            Some(root) => ctx.with_taproot_tweak(&root),
            None => ctx.with_unspendable_taproot_tweak(),
        }
        .map_err(|e| Musig2Error::Aggregation(e.to_string()))?;
        let output: Point = key_agg_ctx.aggregated_pubkey();
        let tap_output_key = XOnlyPublicKey::from_slice(&output.serialize_xonly()).map_err(|e| {
            Musig2Error::InvalidEncoding {
                what: "tap output key",
                reason: e.to_string(),
            }
        })?;
        let agg_nonce = AggNonce::sum(&pub_nonces);
        Ok(Musig2Session {
            key_agg_ctx,
            pub_keys,
            pub_nonces,
            agg_nonce,
            message,
            tap_output_key,
        })
    }

    pub fn tap_output_key(&self) -> &XOnlyPublicKey {
        &self.tap_output_key
    }

    pub fn message(&self) -> &[u8; 32] {
        &self.message
    }

    fn participant_index(&self, key: &CompressedPublicKey) -> Result<usize, Musig2Error> {
        self.pub_keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| Musig2Error::UnknownParticipant(key.to_string()))
    }

    /// Partial signature of the participant holding `secret`.
    ///
    /// The secret nonce is taken out of `store`. The second participant may instead have
    /// used a deterministic nonce, which is recomputed here.
    pub fn partial_sign(
        &self,
        secret: &SecretKey,
        own_nonce: &PubNonce,
        store: &mut Musig2NonceStore,
    ) -> Result<[u8; 32], Musig2Error> {
        let secp = Secp256k1::signing_only();
        let participant = CompressedPublicKey(secret.public_key(&secp));
        let index = self.participant_index(&participant)?;
        if self.pub_nonces[index].serialize() != own_nonce.serialize() {
            return Err(Musig2Error::Signing(
                "public nonce is not the one recorded for this participant".to_string(),
            ));
        }

        let sec_nonce = match store.take_sec_nonce(
            &participant,
            &self.tap_output_key,
            &self.message,
            own_nonce,
        ) {
            Some(sec_nonce) => sec_nonce,
            None if index == 1 => {
                let (sec_nonce, pub_nonce) = deterministic_nonce(
                    secret,
                    &self.pub_nonces[0],
                    &self.tap_output_key,
                    &self.message,
                )?;
                if pub_nonce.serialize() != own_nonce.serialize() {
                    return Err(Musig2Error::MissingSecretNonce);
                }
                sec_nonce
            }
            None => return Err(Musig2Error::MissingSecretNonce),
        };

        let seckey = ::musig2::secp::Scalar::try_from(&secret.secret_bytes()[..]).map_err(|e| {
            Musig2Error::InvalidEncoding {
                what: "secret key",
                reason: e.to_string(),
            }
        })?;
        let partial: PartialSignature = ::musig2::sign_partial(
            &self.key_agg_ctx,
            seckey,
            sec_nonce,
            &self.agg_nonce,
            self.message,
        )
        .map_err(|e| Musig2Error::Signing(e.to_string()))?;
        Ok(partial.serialize())
    }

    /// Whether `partial` is a valid partial signature by `participant`.
    pub fn partial_verify(
        &self,
        participant: &CompressedPublicKey,
        partial: &[u8; 32],
    ) -> Result<bool, Musig2Error> {
        let index = self.participant_index(participant)?;
        let Ok(partial) = PartialSignature::try_from(&partial[..]) else {
            return Ok(false);
        };
        Ok(::musig2::verify_partial(
            &self.key_agg_ctx,
            partial,
            &self.agg_nonce,
            to_point(participant)?,
            &self.pub_nonces[index],
            self.message,
        )
        .is_ok())
    }

    /// Combine one partial signature per participant into the key-path signature.
    pub fn aggregate(&self, partials: &[Musig2PartialSig]) -> Result<taproot::Signature, Musig2Error> {
        let [a, b] = partials else {
            return Err(Musig2Error::PartialSignatureCount {
                expected: 2,
                got: partials.len(),
            });
        };
        if a.sighash != b.sighash {
            return Err(Musig2Error::SighashMismatch);
        }
        let (ia, ib) = (
            self.participant_index(&a.participant_pub_key)?,
            self.participant_index(&b.participant_pub_key)?,
        );
        if ia == ib {
            return Err(Musig2Error::DuplicateRecord {
                what: "partial signature",
                participant: a.participant_pub_key.to_string(),
            });
        }
        for partial in partials {
            if partial.tap_output_key != self.tap_output_key {
                return Err(Musig2Error::TapOutputKeyMismatch {
                    expected: self.tap_output_key.serialize().to_lower_hex_string(),
                    got: partial.tap_output_key.serialize().to_lower_hex_string(),
                });
            }
        }

        let sighash_type = match a.sighash {
            None => TapSighashType::Default,
            Some(byte) => TapSighashType::from_consensus_u8(byte).map_err(|e| {
                Musig2Error::InvalidEncoding {
                    what: "sighash type",
                    reason: e.to_string(),
                }
            })?,
        };

        let signatures = [a.partial_signature()?, b.partial_signature()?];
        let lifted: LiftedSignature = ::musig2::aggregate_partial_signatures(
            &self.key_agg_ctx,
            &self.agg_nonce,
            signatures,
            self.message,
        )
        .map_err(|e| Musig2Error::Aggregation(e.to_string()))?;

        let signature = schnorr::Signature::from_slice(&lifted.to_bytes())
            .map_err(|_| Musig2Error::InvalidAggregate)?;
        Secp256k1::verification_only()
            .verify_schnorr(
                &signature,
                &Message::from_digest(self.message),
                &self.tap_output_key,
            )
            .map_err(|_| Musig2Error::InvalidAggregate)?;
        Ok(taproot::Signature {
            signature,
            sighash_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::musig2::key_agg;
    use crate::taproot::tap_tweak_pubkey;

    struct Fixture {
        secrets: [SecretKey; 2],
        keys: [CompressedPublicKey; 2],
        internal_key: XOnlyPublicKey,
        root: [u8; 32],
        output_key: XOnlyPublicKey,
        message: [u8; 32],
    }

    fn fixture() -> Fixture {
        let secp = Secp256k1::new();
        let secrets = [1u8, 2].map(|i| SecretKey::from_slice(&[i; 32]).unwrap());
        let keys = secrets.map(|s| CompressedPublicKey(s.public_key(&secp)));
        let internal = key_agg(&keys).unwrap();
        let root = [5u8; 32];
        let (output, _) = tap_tweak_pubkey(&internal, Some(&root)).unwrap();
        Fixture {
            secrets,
            keys,
            internal_key: XOnlyPublicKey::from_slice(&internal).unwrap(),
            root,
            output_key: XOnlyPublicKey::from_slice(&output).unwrap(),
            message: [0x3c; 32],
        }
    }

    fn partial(f: &Fixture, index: usize, signature: [u8; 32]) -> Musig2PartialSig {
        Musig2PartialSig {
            participant_pub_key: f.keys[index],
            tap_output_key: f.output_key,
            signature,
            sighash: None,
        }
    }

    #[test]
    fn test_fresh_and_deterministic_nonce_signing() {
        let f = fixture();
        let mut store = Musig2NonceStore::with_salt([0u8; 32]);
        let first = store
            .create_nonce(&f.secrets[0], &f.keys[0], &f.output_key, &f.message, None)
            .unwrap();
        let (_, second) =
            deterministic_nonce(&f.secrets[1], &first, &f.output_key, &f.message).unwrap();

        let session = Musig2Session::new(
            [first.clone(), second.clone()],
            f.keys,
            f.message,
            &f.internal_key,
            Some(f.root),
        )
        .unwrap();
        assert_eq!(session.tap_output_key(), &f.output_key);

        let sig0 = session.partial_sign(&f.secrets[0], &first, &mut store).unwrap();
        // deterministic signer needs no stored secret
        let sig1 = session
            .partial_sign(&f.secrets[1], &second, &mut store)
            .unwrap();
        assert!(session.partial_verify(&f.keys[0], &sig0).unwrap());
        assert!(session.partial_verify(&f.keys[1], &sig1).unwrap());
        assert!(!session.partial_verify(&f.keys[0], &sig1).unwrap());

        let signature = session
            .aggregate(&[partial(&f, 0, sig0), partial(&f, 1, sig1)])
            .unwrap();
        assert_eq!(signature.sighash_type, TapSighashType::Default);
        Secp256k1::verification_only()
            .verify_schnorr(
                &signature.signature,
                &Message::from_digest(f.message),
                &f.output_key,
            )
            .unwrap();
    }

    #[test]
    fn test_secret_nonce_is_single_use() {
        let f = fixture();
        let mut store = Musig2NonceStore::with_salt([0u8; 32]);
        let first = store
            .create_nonce(&f.secrets[0], &f.keys[0], &f.output_key, &f.message, None)
            .unwrap();
        let (_, second) =
            deterministic_nonce(&f.secrets[1], &first, &f.output_key, &f.message).unwrap();
        let session = Musig2Session::new(
            [first.clone(), second],
            f.keys,
            f.message,
            &f.internal_key,
            Some(f.root),
        )
        .unwrap();
        session.partial_sign(&f.secrets[0], &first, &mut store).unwrap();
        assert_eq!(
            session.partial_sign(&f.secrets[0], &first, &mut store),
            Err(Musig2Error::MissingSecretNonce)
        );
    }

    #[test]
    fn test_tampered_partial_fails_verify_and_aggregate() {
        let f = fixture();
        let mut store = Musig2NonceStore::with_salt([0u8; 32]);
        let first = store
            .create_nonce(&f.secrets[0], &f.keys[0], &f.output_key, &f.message, None)
            .unwrap();
        let (_, second) =
            deterministic_nonce(&f.secrets[1], &first, &f.output_key, &f.message).unwrap();
        let session = Musig2Session::new(
            [first.clone(), second.clone()],
            f.keys,
            f.message,
            &f.internal_key,
            Some(f.root),
        )
        .unwrap();
        let sig0 = session.partial_sign(&f.secrets[0], &first, &mut store).unwrap();
        let sig1 = session
            .partial_sign(&f.secrets[1], &second, &mut store)
            .unwrap();

        let mut tampered = sig0;
        tampered[31] ^= 1;
        assert!(!session.partial_verify(&f.keys[0], &tampered).unwrap());
        assert!(session
            .aggregate(&[partial(&f, 0, tampered), partial(&f, 1, sig1)])
            .is_err());
    }

    #[test]
    fn test_aggregate_checks() {
        let f = fixture();
        let mut store = Musig2NonceStore::with_salt([0u8; 32]);
        let first = store
            .create_nonce(&f.secrets[0], &f.keys[0], &f.output_key, &f.message, None)
            .unwrap();
        let (_, second) =
            deterministic_nonce(&f.secrets[1], &first, &f.output_key, &f.message).unwrap();
        let session = Musig2Session::new(
            [first, second],
            f.keys,
            f.message,
            &f.internal_key,
            Some(f.root),
        )
        .unwrap();

        assert_eq!(
            session.aggregate(&[partial(&f, 0, [1u8; 32])]),
            Err(Musig2Error::PartialSignatureCount {
                expected: 2,
                got: 1
            })
        );
        let mut with_sighash = partial(&f, 1, [1u8; 32]);
        with_sighash.sighash = Some(0x01);
        assert_eq!(
            session.aggregate(&[partial(&f, 0, [1u8; 32]), with_sighash]),
            Err(Musig2Error::SighashMismatch)
        );
        assert!(matches!(
            session.aggregate(&[partial(&f, 0, [1u8; 32]), partial(&f, 0, [2u8; 32])]),
            Err(Musig2Error::DuplicateRecord { .. })
        ));
    }

    #[test]
    fn test_session_rejects_foreign_internal_key() {
        let f = fixture();
        let first = ::musig2::SecNonce::new(
            ::musig2::secp::Scalar::one(),
            ::musig2::secp::Scalar::two(),
        )
        .public_nonce();
        assert!(matches!(
            Musig2Session::new(
                [first.clone(), first],
                f.keys,
                f.message,
                &f.output_key,
                Some(f.root),
            ),
            Err(Musig2Error::TapInternalKeyMismatch { .. })
        ));
    }
}

use std::collections::BTreeMap;
use std::fmt;

use ::musig2::secp::{MaybeScalar, Point, Scalar};
use ::musig2::{PubNonce, SecNonce};

use crate::bitcoin::secp256k1::{SecretKey, XOnlyPublicKey};
use crate::bitcoin::CompressedPublicKey;
use crate::taproot::tagged_hash;

use super::Musig2Error;

const NONCE_STORE_TAG: &str = "MuSig/nonce-store";
const DETERMINISTIC_NONCE_TAG: &str = "MuSig/deterministic/nonce";

/// How a participant's public nonce is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NonceOptions {
    /// Seed for nonce generation. Random when absent.
    pub session_id: Option<[u8; 32]>,
    /// Derive the nonce from the first participant's nonce instead of storing a secret.
    /// Only the second participant may do this, and only once the first nonce exists.
    pub deterministic: bool,
}

impl NonceOptions {
    pub fn deterministic() -> Self {
        NonceOptions {
            session_id: None,
            deterministic: true,
        }
    }

    pub fn with_session_id(session_id: [u8; 32]) -> Self {
        NonceOptions {
            session_id: Some(session_id),
            deterministic: false,
        }
    }
}

struct StoredNonce {
    /// Commitment to participant, output key and message, shared by every session id.
    base_id: [u8; 32],
    sec_nonce: SecNonce,
    pub_nonce: PubNonce,
}

/// Secret nonces created by this document, keyed by an opaque id.
///
/// The id commits to the participant key, output key, message and the caller's session id
/// under a salt drawn when the store is created, so ids from different documents never
/// line up.
pub struct Musig2NonceStore {
    salt: [u8; 32],
    nonces: BTreeMap<[u8; 32], StoredNonce>,
}

impl fmt::Debug for Musig2NonceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Musig2NonceStore")
            .field("len", &self.nonces.len())
            .finish_non_exhaustive()
    }
}

fn random_bytes() -> Result<[u8; 32], Musig2Error> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| Musig2Error::Randomness(e.to_string()))?;
    Ok(bytes)
}

fn to_scalar(secret: &SecretKey) -> Result<Scalar, Musig2Error> {
    Scalar::try_from(&secret.secret_bytes()[..]).map_err(|e| Musig2Error::InvalidEncoding {
        what: "secret key",
        reason: e.to_string(),
    })
}

/// Output key as an even-y point, the form nonce derivation commits to.
fn output_key_point(tap_output_key: &XOnlyPublicKey) -> Result<Point, Musig2Error> {
    let mut bytes = [0x02u8; 33];
    bytes[1..].copy_from_slice(&tap_output_key.serialize());
    Point::try_from(&bytes[..]).map_err(|e| Musig2Error::InvalidEncoding {
        what: "tap output key",
        reason: e.to_string(),
    })
}

impl Musig2NonceStore {
    pub fn new() -> Result<Self, Musig2Error> {
        Ok(Self::with_salt(random_bytes()?))
    }

    pub(crate) fn with_salt(salt: [u8; 32]) -> Self {
        Musig2NonceStore {
            salt,
            nonces: BTreeMap::new(),
        }
    }

    fn base_id(
        &self,
        participant: &CompressedPublicKey,
        tap_output_key: &XOnlyPublicKey,
        message: &[u8; 32],
    ) -> [u8; 32] {
        let mut data = Vec::with_capacity(33 + 32 + 32 + 32);
        data.extend_from_slice(&participant.to_bytes());
        data.extend_from_slice(&tap_output_key.serialize());
        data.extend_from_slice(message);
        data.extend_from_slice(&self.salt);
        tagged_hash(NONCE_STORE_TAG, &data)
    }

    fn nonce_id(base_id: &[u8; 32], session_id: Option<&[u8; 32]>) -> [u8; 32] {
        let mut data = Vec::with_capacity(32 + 1 + 32);
        data.extend_from_slice(base_id);
        match session_id {
            Some(session_id) => {
                data.push(1);
                data.extend_from_slice(session_id);
            }
            None => data.push(0),
        }
        tagged_hash(NONCE_STORE_TAG, &data)
    }

    /// Fresh public nonce for `participant`, or the one already created for the same
    /// participant, output key, message and session id.
    pub fn create_nonce(
        &mut self,
        secret: &SecretKey,
        participant: &CompressedPublicKey,
        tap_output_key: &XOnlyPublicKey,
        message: &[u8; 32],
        session_id: Option<[u8; 32]>,
    ) -> Result<PubNonce, Musig2Error> {
        let base_id = self.base_id(participant, tap_output_key, message);
        let id = Self::nonce_id(&base_id, session_id.as_ref());
        if let Some(stored) = self.nonces.get(&id) {
            return Ok(stored.pub_nonce.clone());
        }
        let seed = match session_id {
            Some(session_id) => session_id,
            None => random_bytes()?,
        };
        let sec_nonce = SecNonce::generate(
            seed,
            to_scalar(secret)?,
            output_key_point(tap_output_key)?,
            message,
            b"",
        );
        let pub_nonce = sec_nonce.public_nonce();
        self.nonces.insert(
            id,
            StoredNonce {
                base_id,
                sec_nonce,
                pub_nonce: pub_nonce.clone(),
            },
        );
        Ok(pub_nonce)
    }

    /// Remove and return the secret nonce, but only if it belongs to `pub_nonce`.
    pub fn take_sec_nonce(
        &mut self,
        participant: &CompressedPublicKey,
        tap_output_key: &XOnlyPublicKey,
        message: &[u8; 32],
        pub_nonce: &PubNonce,
    ) -> Option<SecNonce> {
        let base_id = self.base_id(participant, tap_output_key, message);
        let pub_nonce = pub_nonce.serialize();
        let id = self
            .nonces
            .iter()
            .find(|(_, stored)| {
                stored.base_id == base_id && stored.pub_nonce.serialize() == pub_nonce
            })
            .map(|(id, _)| *id)?;
        self.nonces.remove(&id).map(|stored| stored.sec_nonce)
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }
}

/// Nonce for the second signer, derived from everything it commits to once the first
/// signer's nonce is known. Recomputable at signing time, so nothing has to be stored.
///
/// `k_i = H("MuSig/deterministic/nonce", sk || first_nonce || output_key || len(msg) || msg || i)`
pub fn deterministic_nonce(
    secret: &SecretKey,
    first_nonce: &PubNonce,
    tap_output_key: &XOnlyPublicKey,
    message: &[u8; 32],
) -> Result<(SecNonce, PubNonce), Musig2Error> {
    let mut prefix = Vec::with_capacity(32 + 66 + 32 + 8 + 32 + 1);
    prefix.extend_from_slice(&secret.secret_bytes());
    prefix.extend_from_slice(&first_nonce.serialize());
    prefix.extend_from_slice(&tap_output_key.serialize());
    prefix.extend_from_slice(&(message.len() as u64).to_be_bytes());
    prefix.extend_from_slice(message);

    let mut k = [Scalar::one(); 2];
    for (i, slot) in k.iter_mut().enumerate() {
        let mut data = prefix.clone();
        data.push(i as u8);
        let hash = tagged_hash(DETERMINISTIC_NONCE_TAG, &data);
        *slot = MaybeScalar::from_slice(&hash)
            .ok()
            .and_then(|s| s.not_zero().ok())
            .ok_or_else(|| Musig2Error::InvalidEncoding {
                what: "deterministic nonce",
                reason: "hash is not a valid scalar".to_string(),
            })?;
    }
    let sec_nonce = SecNonce::new(k[0], k[1]);
    let pub_nonce = sec_nonce.public_nonce();
    Ok((sec_nonce, pub_nonce))
}

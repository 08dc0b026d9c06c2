//! Two-party MuSig2 (BIP327) signing for taproot key-path spends.
//!
//! Session data travels in PSBT proprietary key-values (see [`records`]). The participant
//! record pins the pair of signing keys and the tweak, each participant adds one public
//! nonce and later one partial signature, and finalization aggregates the two partials
//! into a single BIP340 signature for the output key.
//!
//! Secret nonces never touch the document. They are kept in a [`Musig2NonceStore`] owned by
//! the [`crate::WalletPsbt`] and consumed on signing.

mod nonce;
mod records;
mod session;

pub use nonce::{deterministic_nonce, Musig2NonceStore, NonceOptions};
pub use records::{
    get_nonces, get_participants, is_musig2_input, parse_musig2_nonces,
    parse_musig2_partial_sigs, parse_musig2_participants, Musig2PartialSig, Musig2Participants,
    Musig2PubNonce,
};
pub use session::Musig2Session;

use ::musig2::secp::Point;
use ::musig2::KeyAggContext;

use crate::bitcoin::CompressedPublicKey;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Musig2Error {
    #[error("missing musig2 participants")]
    MissingParticipants,
    #[error("invalid keydata length: expected {expected}, got {got}")]
    InvalidKeydataLength { expected: usize, got: usize },
    #[error("invalid value length: expected {expected}, got {got}")]
    InvalidValueLength { expected: &'static str, got: usize },
    #[error("invalid {what}: {reason}")]
    InvalidEncoding { what: &'static str, reason: String },
    #[error("duplicate participant public keys")]
    DuplicateParticipantKeys,
    #[error("too many {what} records: expected at most {expected}, got {got}")]
    TooManyKeyValues {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("expected {expected} public nonces, got {got}")]
    NonceCount { expected: usize, got: usize },
    #[error("expected {expected} partial signatures, got {got}")]
    PartialSignatureCount { expected: usize, got: usize },
    #[error("{0} is not a musig2 participant of this input")]
    UnknownParticipant(String),
    #[error("duplicate {what} for participant {participant}")]
    DuplicateRecord {
        what: &'static str,
        participant: String,
    },
    #[error("tap output key mismatch: expected {expected}, got {got}")]
    TapOutputKeyMismatch { expected: String, got: String },
    #[error("tap internal key mismatch: expected {expected}, got {got}")]
    TapInternalKeyMismatch { expected: String, got: String },
    #[error("partial signatures disagree on sighash type")]
    SighashMismatch,
    #[error("no secret nonce available for this participant and message")]
    MissingSecretNonce,
    #[error("deterministic nonce cannot be combined with a session id")]
    DeterministicWithSessionId,
    #[error("deterministic nonce requires the first participant's nonce")]
    DeterministicRequiresFirstNonce,
    #[error("only the second participant may use a deterministic nonce")]
    DeterministicFirstParticipant,
    #[error("randomness unavailable: {0}")]
    Randomness(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("aggregation failed: {0}")]
    Aggregation(String),
    #[error("aggregate signature does not verify although both partial signatures do")]
    InvalidAggregate,
}

impl Musig2Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Musig2Error::InvalidKeydataLength { .. }
            | Musig2Error::InvalidValueLength { .. }
            | Musig2Error::InvalidEncoding { .. }
            | Musig2Error::DuplicateParticipantKeys
            | Musig2Error::TapOutputKeyMismatch { .. }
            | Musig2Error::TapInternalKeyMismatch { .. }
            | Musig2Error::Randomness(_)
            | Musig2Error::Signing(_) => ErrorKind::Validation,
            Musig2Error::InvalidAggregate => ErrorKind::IllegalState,
            Musig2Error::MissingParticipants
            | Musig2Error::TooManyKeyValues { .. }
            | Musig2Error::NonceCount { .. }
            | Musig2Error::PartialSignatureCount { .. }
            | Musig2Error::UnknownParticipant(_)
            | Musig2Error::DuplicateRecord { .. }
            | Musig2Error::SighashMismatch
            | Musig2Error::MissingSecretNonce
            | Musig2Error::DeterministicWithSessionId
            | Musig2Error::DeterministicRequiresFirstNonce
            | Musig2Error::DeterministicFirstParticipant
            | Musig2Error::Aggregation(_) => ErrorKind::Aggregation,
        }
    }
}

pub(crate) fn to_point(key: &CompressedPublicKey) -> Result<Point, Musig2Error> {
    Point::try_from(&key.to_bytes()[..]).map_err(|e| Musig2Error::InvalidEncoding {
        what: "participant key",
        reason: e.to_string(),
    })
}

pub(crate) fn key_agg_context(keys: &[CompressedPublicKey]) -> Result<KeyAggContext, Musig2Error> {
    let points = keys.iter().map(to_point).collect::<Result<Vec<_>, _>>()?;
    KeyAggContext::new(points).map_err(|e| Musig2Error::Aggregation(e.to_string()))
}

/// BIP327 aggregate of `keys` in the given order, as an x-only key.
pub fn key_agg(keys: &[CompressedPublicKey]) -> Result<[u8; 32], Musig2Error> {
    let ctx = key_agg_context(keys)?;
    Ok(ctx.aggregated_pubkey::<Point>().serialize_xonly())
}

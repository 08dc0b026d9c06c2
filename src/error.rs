use crate::musig2::Musig2Error;
use crate::taproot::TaprootError;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse category of an [`Error`].
///
/// Every failure that leaves the crate falls into one of these buckets. Pattern
/// mismatches never escape the matcher, so they have no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed data: bad lengths, invalid points, wrong counts, disallowed sighash.
    Validation,
    /// Operation is not supported by the input's current classification or state.
    State,
    /// MuSig2 bookkeeping failure: participant/nonce/partial counts, nonce misuse.
    Aggregation,
    /// Internal invariant broken. Never downgraded to a boolean.
    IllegalState,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    State(String),
    #[error("{0}")]
    Aggregation(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("could not parse input: {0}")]
    UnparsableInput(String),
    #[error("input index {index} out of bounds (total inputs: {count})")]
    InputIndexOutOfBounds { index: usize, count: usize },
    #[error("input {index}: {source}")]
    Input {
        index: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("{operation} failed for every input: {}", format_input_errors(.errors))]
    NoInputSucceeded {
        operation: &'static str,
        errors: Vec<(usize, Error)>,
    },
    #[error(transparent)]
    Taproot(#[from] TaprootError),
    #[error(transparent)]
    Musig2(#[from] Musig2Error),
    #[error("psbt error: {0}")]
    Psbt(#[from] crate::bitcoin::psbt::Error),
    #[error("bip32 error: {0}")]
    Bip32(#[from] crate::bitcoin::bip32::Error),
    #[error("secp256k1 error: {0}")]
    Secp256k1(#[from] crate::bitcoin::secp256k1::Error),
    #[error("sighash error: {0}")]
    Sighash(String),
    #[error("address error: {0}")]
    Address(String),
}

fn format_input_errors(errors: &[(usize, Error)]) -> String {
    errors
        .iter()
        .map(|(index, e)| format!("input {}: {}", index, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::State(_) => ErrorKind::State,
            Error::Aggregation(_) => ErrorKind::Aggregation,
            Error::IllegalState(_) => ErrorKind::IllegalState,
            Error::Input { source, .. } => source.kind(),
            Error::NoInputSucceeded { errors, .. } => errors
                .first()
                .map(|(_, e)| e.kind())
                .unwrap_or(ErrorKind::State),
            Error::Musig2(e) => e.kind(),
            Error::Validation(_)
            | Error::UnparsableInput(_)
            | Error::InputIndexOutOfBounds { .. }
            | Error::Taproot(_)
            | Error::Psbt(_)
            | Error::Bip32(_)
            | Error::Secp256k1(_)
            | Error::Sighash(_)
            | Error::Address(_) => ErrorKind::Validation,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        Error::State(message.into())
    }

    /// Attach the input index the error occurred on.
    pub fn at_input(self, index: usize) -> Self {
        match self {
            e @ Error::Input { .. } => e,
            e => Error::Input {
                index,
                source: Box::new(e),
            },
        }
    }
}

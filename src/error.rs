use std::time::Duration;

use thiserror::Error;

/// Errors raised by the field layer and by share splitting / reconstruction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharingError {
    #[error("invalid threshold: need 1 <= threshold ({threshold}) <= shares ({shares})")]
    InvalidThreshold { threshold: usize, shares: usize },
    #[error("secret is {len} bytes, at most {max} bytes fit in one field element")]
    EncodingOutOfRange { len: usize, max: usize },
    #[error("field element does not carry an embedded secret")]
    InvalidEncoding,
    #[error("insufficient shares: got {got}, need {need}")]
    InsufficientShares { got: usize, need: usize },
    #[error("duplicate share index {0}")]
    DuplicateShareIndex(u16),
    #[error("share index must be non-zero")]
    InvalidShareIndex,
    #[error("malformed share: {0}")]
    MalformedShare(String),
    #[error("zero has no multiplicative inverse")]
    NonInvertible,
}

/// Framing and decoding failures on a single connection.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame exceeds {max} bytes")]
    FrameTooLarge { max: usize },
    #[error("connection closed before a complete frame")]
    Closed,
    #[error("undecodable frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: &'static str },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures of a whole retrieval, as seen by the collecting role.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("quorum timeout: {accepted}/{threshold} shares after {elapsed:?}")]
    QuorumTimeout {
        accepted: usize,
        threshold: usize,
        elapsed: Duration,
    },
    #[error("quorum unreachable: {accepted} accepted, {pending} pending, need {threshold}")]
    QuorumUnreachable {
        accepted: usize,
        pending: usize,
        threshold: usize,
    },
    #[error("coordinator reported failure: {0}")]
    Remote(String),
    #[error(transparent)]
    Sharing(#[from] SharingError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type SharingResult<T> = Result<T, SharingError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;

//! Error types for the protocol crate.

use objsync_codec::{Checksum, CodecError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building, verifying or decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An inline payload does not hash to the advertised checksum.
    #[error("checksum mismatch for {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Object ID.
        id: Uuid,
        /// Advertised checksum.
        expected: Checksum,
        /// Checksum of the payload actually received.
        actual: Checksum,
    },

    /// The envelope has no inline payload (it was uploaded as a blob).
    #[error("payload for {id} is not inline")]
    MissingPayload {
        /// Object ID.
        id: Uuid,
    },

    /// A wire record is structurally invalid.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The peer answered with a response of the wrong kind.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ProtocolError {
    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    /// Returns true if the error indicates corrupted content.
    pub fn is_corruption(&self) -> bool {
        matches!(self, ProtocolError::ChecksumMismatch { .. })
    }
}

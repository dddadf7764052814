//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// NaN has no canonical encoding.
    #[error("NaN values are forbidden")]
    NaNForbidden,

    /// Input bytes are not in canonical form.
    #[error("non-canonical input: {message}")]
    NonCanonical {
        /// What was out of order.
        message: String,
    },

    /// A checksum string could not be parsed.
    #[error("invalid checksum: {message}")]
    InvalidChecksum {
        /// Description of the parse error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a non-canonical input error.
    pub fn non_canonical(message: impl Into<String>) -> Self {
        Self::NonCanonical {
            message: message.into(),
        }
    }

    /// Create an invalid checksum error.
    pub fn invalid_checksum(message: impl Into<String>) -> Self {
        Self::InvalidChecksum {
            message: message.into(),
        }
    }

    /// Returns true if the error happened while encoding.
    pub fn is_encoding(&self) -> bool {
        matches!(self, CodecError::EncodingFailed { .. } | CodecError::NaNForbidden)
    }
}

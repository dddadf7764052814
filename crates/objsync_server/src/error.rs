//! Error types for the reference remote.

use objsync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Batch exceeds the configured limit.
    #[error("batch too large: {size} > {max}")]
    BatchTooLarge {
        /// Records in the request.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Upload URL or headers did not validate.
    #[error("upload not authorized: {0}")]
    NotAuthorized(String),

    /// Blob exceeds the size reserved for its slot.
    #[error("blob too large: {size} > {max}")]
    BlobTooLarge {
        /// Uploaded bytes.
        size: usize,
        /// Reserved bytes.
        max: u64,
    },

    /// An envelope references a blob that was never uploaded.
    #[error("missing blob for {id}: {blob_ref}")]
    MissingBlob {
        /// Object ID.
        id: Uuid,
        /// Referenced blob.
        blob_ref: String,
    },

    /// Record failed validation or checksum verification.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if the client sent something wrong.
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if the failure is on the server side and may go away on
    /// retry.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::NotAuthorized("sig".into()).is_server_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::BatchTooLarge { size: 12, max: 10 };
        let msg = err.to_string();
        assert!(msg.contains("12"));
        assert!(msg.contains("10"));
    }
}

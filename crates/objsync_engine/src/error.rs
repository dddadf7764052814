//! Error types for the sync engine.

use objsync_codec::CodecError;
use objsync_protocol::{ConflictDetails, Envelope, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Errors are `Clone` so a single batch-level failure can be reported for
/// every entry it affected.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The remote holds a newer version; carries both sides.
    #[error("checksum conflict for {}", .0.id())]
    ChecksumConflict(Box<ConflictDetails>),

    /// Conflicts kept coming back after the allowed number of resends.
    #[error("conflict for {id} persisted after {attempts} resends")]
    ConflictRetriesExhausted {
        /// Object ID.
        id: Uuid,
        /// Resends performed.
        attempts: u32,
    },

    /// Some entries of a batch failed.
    #[error("{} of {} items failed", .0.failed.len(), .0.len())]
    MultipleErrors(Box<BatchFailure>),

    /// An object could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A payload could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// An envelope of another type reached a typed engine.
    #[error("invalid type: expected {expected}, found {found}")]
    InvalidType {
        /// Type the engine handles.
        expected: String,
        /// Type of the envelope.
        found: String,
    },

    /// The local store failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// Malformed or corrupted protocol data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A payload could not be encrypted or decrypted.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// A payload was encrypted under a different key.
    #[error("payload of {id} was encrypted with a different key")]
    KeyMismatch {
        /// Object ID.
        id: Uuid,
    },

    /// A direct upload failed.
    #[error("upload failed: {0}")]
    Upload(String),

    /// The object does not exist.
    #[error("object {0} not found")]
    NotFound(Uuid),

    /// No free disambiguated key was found.
    #[error("no free key for {key:?} after {attempts} attempts")]
    DisambiguationExhausted {
        /// Key that collided.
        key: String,
        /// Suffixes tried.
        attempts: u32,
    },
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a local store error.
    pub fn local_store(message: impl Into<String>) -> Self {
        Self::LocalStore(message.into())
    }

    /// Creates a conflict error.
    pub fn conflict(local: Envelope, remote: Option<Envelope>) -> Self {
        Self::ChecksumConflict(Box::new(ConflictDetails::new(local, remote)))
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ConflictRetriesExhausted { .. } => true,
            SyncError::MultipleErrors(failure) => {
                failure.failed.iter().all(|item| item.error.is_retryable())
            }
            _ => false,
        }
    }

    /// Returns true for conflict errors.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::ChecksumConflict(_) | SyncError::ConflictRetriesExhausted { .. }
        )
    }

    /// Returns the conflict details of a `ChecksumConflict`.
    pub fn conflict_details(&self) -> Option<&ConflictDetails> {
        match self {
            SyncError::ChecksumConflict(details) => Some(details),
            _ => None,
        }
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        if err.is_encoding() {
            SyncError::Encoding(err.to_string())
        } else {
            SyncError::Decoding(err.to_string())
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Codec(codec) => codec.into(),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

/// One failed entry of a batch.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// Object ID.
    pub id: Uuid,
    /// Why it failed.
    pub error: SyncError,
}

/// Partial result of a batch save: every input ID appears exactly once,
/// either in `accepted` or in `failed`.
#[derive(Debug, Clone, Default)]
pub struct BatchFailure {
    /// Acknowledged envelopes.
    pub accepted: Vec<Envelope>,
    /// Failed entries.
    pub failed: Vec<ItemFailure>,
}

impl BatchFailure {
    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.accepted.len() + self.failed.len()
    }

    /// Returns true if the batch had no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Error for a given ID, if it failed.
    pub fn error_for(&self, id: Uuid) -> Option<&SyncError> {
        self.failed
            .iter()
            .find(|item| item.id == id)
            .map(|item| &item.error)
    }
}

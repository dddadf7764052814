//! The unit of transfer between a device and the remote store.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use objsync_codec::{from_canonical_bytes, Checksum};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Lifecycle timestamps carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    /// When the object was first created.
    pub created_at: DateTime<Utc>,
    /// When the object was last modified.
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Timestamps {
    /// Timestamps for an object created now.
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns true if the tombstone marker is set.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A versioned, checksummed wrapper around one encoded domain object.
///
/// The checksum is always derived from the payload when the envelope is
/// sealed. An envelope whose payload was moved to blob storage keeps the
/// checksum of the uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    id: Uuid,
    type_tag: String,
    payload: Option<Bytes>,
    checksum: Checksum,
    previous_checksum: Option<Checksum>,
    timestamps: Timestamps,
    large_blob_ref: Option<String>,
    received_at: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Seals an encoded payload into a new envelope.
    pub fn seal(
        id: Uuid,
        type_tag: impl Into<String>,
        payload: impl Into<Bytes>,
        timestamps: Timestamps,
    ) -> Self {
        let payload = payload.into();
        Self {
            id,
            type_tag: type_tag.into(),
            checksum: Checksum::of(&payload),
            payload: Some(payload),
            previous_checksum: None,
            timestamps,
            large_blob_ref: None,
            received_at: None,
        }
    }

    /// Rebuilds an envelope from wire parts.
    ///
    /// Inline payloads are re-hashed and must match `checksum`.
    pub(crate) fn from_parts(
        id: Uuid,
        type_tag: String,
        payload: Option<Bytes>,
        checksum: Checksum,
        timestamps: Timestamps,
        large_blob_ref: Option<String>,
    ) -> ProtocolResult<Self> {
        match (&payload, &large_blob_ref) {
            (None, None) => {
                return Err(ProtocolError::invalid_record(format!(
                    "{id} has neither data nor blob_ref"
                )))
            }
            (Some(_), Some(_)) => {
                return Err(ProtocolError::invalid_record(format!(
                    "{id} has both data and blob_ref"
                )))
            }
            _ => {}
        }
        let envelope = Self {
            id,
            type_tag,
            payload,
            checksum,
            previous_checksum: None,
            timestamps,
            large_blob_ref,
            received_at: None,
        };
        envelope.verify()?;
        Ok(envelope)
    }

    /// Object ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Domain type name.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Inline payload, absent when the bytes live in blob storage.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Size of the inline payload in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Checksum of the payload.
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Checksum of the remote version this envelope replaces.
    pub fn previous_checksum(&self) -> Option<Checksum> {
        self.previous_checksum
    }

    /// Lifecycle timestamps.
    pub fn timestamps(&self) -> Timestamps {
        self.timestamps
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.timestamps.created_at
    }

    /// Last modification time.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.timestamps.updated_at
    }

    /// Tombstone time.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.timestamps.deleted_at
    }

    /// Returns true if the envelope carries a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.timestamps.is_deleted()
    }

    /// Reference to the uploaded blob, if any.
    pub fn large_blob_ref(&self) -> Option<&str> {
        self.large_blob_ref.as_deref()
    }

    /// Time the remote store received this version.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    /// Sets the CAS precondition.
    pub fn with_previous_checksum(mut self, previous: Option<Checksum>) -> Self {
        self.previous_checksum = previous;
        self
    }

    /// Stamps the reception time.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    /// Replaces the inline payload by a blob reference.
    pub fn into_blob_ref(mut self, blob_ref: impl Into<String>) -> Self {
        self.payload = None;
        self.large_blob_ref = Some(blob_ref.into());
        self
    }

    /// Attaches downloaded blob bytes, checking them against the checksum.
    ///
    /// The blob reference is dropped; an envelope carries one or the other.
    pub fn with_inline_payload(mut self, payload: impl Into<Bytes>) -> ProtocolResult<Self> {
        self.payload = Some(payload.into());
        self.large_blob_ref = None;
        self.verify()?;
        Ok(self)
    }

    /// Re-hashes the inline payload.
    ///
    /// Envelopes without an inline payload always verify.
    pub fn verify(&self) -> ProtocolResult<()> {
        let Some(payload) = &self.payload else {
            return Ok(());
        };
        let actual = Checksum::of(payload);
        if actual != self.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                id: self.id,
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Decodes the inline payload.
    pub fn decode<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        let payload = self
            .payload
            .as_ref()
            .ok_or(ProtocolError::MissingPayload { id: self.id })?;
        Ok(from_canonical_bytes(payload)?)
    }
}

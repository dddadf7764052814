//! CBOR wire records exchanged with the remote store.
//!
//! Records are plain serde structs. Conversion into [`Envelope`] re-verifies
//! inline payloads, so a record whose `data` was altered in transit never
//! becomes an envelope.

use crate::envelope::{Envelope, Timestamps};
use crate::error::{ProtocolError, ProtocolResult};
use crate::outcome::EnvelopeOutcome;
use crate::upload::UploadSlot;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use objsync_codec::{from_canonical_bytes, to_canonical_bytes, Checksum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Wire form of an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecord {
    /// Object ID.
    pub id: Uuid,
    /// Domain type name.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// Inline payload.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "serde_bytes")]
    pub data: Option<Vec<u8>>,
    /// Blob reference when the payload was uploaded directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    /// Payload checksum.
    pub checksum: Checksum,
    /// CAS precondition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_checksum: Option<Checksum>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Tombstone time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Server reception time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl From<&Envelope> for EnvelopeRecord {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id(),
            type_tag: envelope.type_tag().to_string(),
            data: envelope.payload().map(|p| p.to_vec()),
            blob_ref: envelope.large_blob_ref().map(str::to_string),
            checksum: envelope.checksum(),
            previous_checksum: envelope.previous_checksum(),
            created_at: envelope.created_at(),
            updated_at: envelope.updated_at(),
            deleted_at: envelope.deleted_at(),
            received_at: envelope.received_at(),
        }
    }
}

impl TryFrom<EnvelopeRecord> for Envelope {
    type Error = ProtocolError;

    fn try_from(record: EnvelopeRecord) -> ProtocolResult<Self> {
        let timestamps = Timestamps {
            created_at: record.created_at,
            updated_at: record.updated_at,
            deleted_at: record.deleted_at,
        };
        let mut envelope = Envelope::from_parts(
            record.id,
            record.type_tag,
            record.data.map(Bytes::from),
            record.checksum,
            timestamps,
            record.blob_ref,
        )?
        .with_previous_checksum(record.previous_checksum);
        if let Some(received_at) = record.received_at {
            envelope = envelope.with_received_at(received_at);
        }
        Ok(envelope)
    }
}

/// Status of one entry in a save response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Stored.
    Accepted,
    /// CAS mismatch.
    Conflict,
}

/// Wire form of an [`EnvelopeOutcome`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Object ID.
    pub id: Uuid,
    /// Accepted or conflict.
    pub status: OutcomeStatus,
    /// Authoritative checksum of an accepted entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Remote version of a conflicted entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<EnvelopeRecord>,
}

impl From<&EnvelopeOutcome> for OutcomeRecord {
    fn from(outcome: &EnvelopeOutcome) -> Self {
        match outcome {
            EnvelopeOutcome::Accepted { id, checksum } => Self {
                id: *id,
                status: OutcomeStatus::Accepted,
                checksum: Some(*checksum),
                remote: None,
            },
            EnvelopeOutcome::Conflict { id, remote } => Self {
                id: *id,
                status: OutcomeStatus::Conflict,
                checksum: None,
                remote: remote.as_ref().map(EnvelopeRecord::from),
            },
        }
    }
}

impl TryFrom<OutcomeRecord> for EnvelopeOutcome {
    type Error = ProtocolError;

    fn try_from(record: OutcomeRecord) -> ProtocolResult<Self> {
        match record.status {
            OutcomeStatus::Accepted => {
                let checksum = record.checksum.ok_or_else(|| {
                    ProtocolError::invalid_record(format!("accepted {} without checksum", record.id))
                })?;
                Ok(EnvelopeOutcome::Accepted {
                    id: record.id,
                    checksum,
                })
            }
            OutcomeStatus::Conflict => Ok(EnvelopeOutcome::Conflict {
                id: record.id,
                remote: record.remote.map(Envelope::try_from).transpose()?,
            }),
        }
    }
}

/// Remote checksum of one object, used for delta pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumEntry {
    /// Object ID.
    pub id: Uuid,
    /// Checksum currently held by the remote.
    pub checksum: Checksum,
    /// When the remote received that version.
    pub received_at: DateTime<Utc>,
}

/// A batch of envelopes to save.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSaveRequest {
    /// Records in request order.
    pub records: Vec<EnvelopeRecord>,
}

impl BatchSaveRequest {
    /// Builds a request from envelopes.
    pub fn from_envelopes(envelopes: &[Envelope]) -> Self {
        Self {
            records: envelopes.iter().map(EnvelopeRecord::from).collect(),
        }
    }
}

/// One outcome per record of a [`BatchSaveRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchSaveResponse {
    /// Outcomes in request order.
    pub results: Vec<OutcomeRecord>,
}

impl BatchSaveResponse {
    /// Converts every result into an outcome.
    pub fn into_outcomes(self) -> ProtocolResult<Vec<EnvelopeOutcome>> {
        self.results
            .into_iter()
            .map(EnvelopeOutcome::try_from)
            .collect()
    }
}

/// A request to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Save one envelope.
    Save(EnvelopeRecord),
    /// Save several envelopes at once.
    SaveBatch(BatchSaveRequest),
    /// Fetch objects by ID.
    Fetch {
        /// Requested IDs.
        ids: Vec<Uuid>,
    },
    /// List checksums of one type received after a cursor.
    FetchChecksums {
        /// Domain type name.
        type_tag: String,
        /// Exclusive lower bound on `received_at`.
        since: Option<DateTime<Utc>>,
    },
    /// Reserve a direct upload slot.
    PrepareUpload {
        /// Object ID.
        id: Uuid,
        /// Payload size in bytes.
        size: u64,
    },
    /// Upload blob bytes to a slot.
    PutBlob {
        /// Signed upload URL.
        url: String,
        /// Headers issued with the slot.
        headers: BTreeMap<String, String>,
        /// Blob content.
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    /// Delete one object.
    Delete {
        /// Object ID.
        id: Uuid,
    },
    /// Delete every object, or every object of one type.
    DeleteAll {
        /// Restricts deletion to one type.
        type_tag: Option<String>,
    },
}

/// A response from the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Result of a single save.
    Saved(OutcomeRecord),
    /// Result of a batch save.
    SavedBatch(BatchSaveResponse),
    /// Fetched records.
    Records(Vec<EnvelopeRecord>),
    /// Checksum listing.
    Checksums(Vec<ChecksumEntry>),
    /// A reserved upload slot.
    Upload(UploadSlot),
    /// Success without a body.
    Done,
    /// The request failed.
    Error {
        /// Description.
        message: String,
        /// Whether the client may retry.
        retryable: bool,
    },
}

impl Request {
    /// Encodes to canonical CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_canonical_bytes(self)?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_canonical_bytes(bytes)?)
    }
}

impl Response {
    /// Encodes to canonical CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(to_canonical_bytes(self)?)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(from_canonical_bytes(bytes)?)
    }

    /// Builds an error response.
    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self::Error {
            message: message.into(),
            retryable,
        }
    }
}

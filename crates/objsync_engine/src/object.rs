//! Traits domain types implement to take part in sync.

use crate::error::SyncResult;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use objsync_codec::{from_canonical_bytes, to_canonical_bytes, Checksum};
use objsync_protocol::{Envelope, ProtocolError, Timestamps};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A value with a stable identity.
pub trait Identifiable {
    /// Stable object ID.
    fn id(&self) -> Uuid;
}

/// A value with a canonical byte encoding.
///
/// Implemented for every serde type; the encoding is canonical CBOR.
pub trait Encodable: Sized {
    /// Encodes to canonical bytes.
    fn encode(&self) -> SyncResult<Bytes>;

    /// Decodes from bytes.
    fn decode(bytes: &[u8]) -> SyncResult<Self>;
}

impl<T: Serialize + DeserializeOwned> Encodable for T {
    fn encode(&self) -> SyncResult<Bytes> {
        Ok(Bytes::from(to_canonical_bytes(self)?))
    }

    fn decode(bytes: &[u8]) -> SyncResult<Self> {
        Ok(from_canonical_bytes(bytes)?)
    }
}

/// A domain record type the engine can sync.
pub trait SyncObject: Identifiable + Encodable + Clone + Send + Sync + 'static {
    /// Type name carried in every envelope.
    const TYPE_TAG: &'static str;

    /// Lifecycle timestamps.
    fn timestamps(&self) -> Timestamps;

    /// Sets or clears the tombstone marker.
    fn set_deleted_at(&mut self, deleted_at: Option<DateTime<Utc>>);

    /// Returns true if the record carries no meaningful content.
    ///
    /// Empty records arriving from the remote are discarded.
    fn is_empty(&self) -> bool {
        false
    }

    /// Key that must be unique among live records of this type, such as a
    /// title or a journal date.
    fn uniqueness_key(&self) -> Option<String> {
        None
    }

    /// Returns a copy carrying a different uniqueness key, or `None` if the
    /// type cannot be renamed.
    fn with_uniqueness_key(&self, _key: &str) -> Option<Self> {
        None
    }

    /// Returns true if the tombstone marker is set.
    fn is_deleted(&self) -> bool {
        self.timestamps().is_deleted()
    }

    /// Returns a tombstoned copy.
    fn tombstoned(&self, at: DateTime<Utc>) -> Self {
        let mut copy = self.clone();
        copy.set_deleted_at(Some(at));
        copy
    }
}

/// Field-level merge for types that know how to combine two versions.
pub trait Mergeable {
    /// Combines `self` (local) with `remote`.
    fn merge(&self, remote: &Self) -> Self;
}

/// Seals an object into an envelope without a CAS precondition.
pub fn seal<T: SyncObject>(object: &T) -> SyncResult<Envelope> {
    Ok(Envelope::seal(
        object.id(),
        T::TYPE_TAG,
        object.encode()?,
        object.timestamps(),
    ))
}

/// Checksum of an object's canonical encoding.
pub fn checksum_of<T: SyncObject>(object: &T) -> SyncResult<Checksum> {
    Ok(Checksum::of(&object.encode()?))
}

/// Verifies an envelope and decodes its inline payload.
pub fn unseal<T: SyncObject>(envelope: &Envelope) -> SyncResult<T> {
    envelope.verify()?;
    let payload = envelope
        .payload()
        .ok_or(ProtocolError::MissingPayload { id: envelope.id() })?;
    T::decode(payload)
}

//! Remote object storage with compare-and-swap saves.

use crate::error::{ServerError, ServerResult};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use objsync_protocol::wire::ChecksumEntry;
use objsync_protocol::{Envelope, EnvelopeOutcome};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Authoritative object storage.
///
/// The store maintains:
/// - The current envelope of every object, payload always inline
/// - Uploaded blobs not yet claimed by a save
/// - A strictly increasing reception clock used for delta pulls
pub struct RemoteStore {
    objects: RwLock<HashMap<Uuid, Envelope>>,
    blobs: RwLock<HashMap<String, Bytes>>,
    last_received: Mutex<Option<DateTime<Utc>>>,
    embed_remote: bool,
}

impl RemoteStore {
    /// Creates an empty store.
    pub fn new(embed_remote: bool) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            blobs: RwLock::new(HashMap::new()),
            last_received: Mutex::new(None),
            embed_remote,
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if no object is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Number of uploaded blobs not yet referenced by a save.
    pub fn pending_blobs(&self) -> usize {
        self.blobs.read().len()
    }

    /// Current version of an object.
    pub fn get(&self, id: Uuid) -> Option<Envelope> {
        self.objects.read().get(&id).cloned()
    }

    /// Saves one envelope if its `previous_checksum` matches.
    pub fn save(&self, envelope: Envelope) -> ServerResult<EnvelopeOutcome> {
        let mut outcomes = self.save_batch(vec![envelope])?;
        outcomes
            .pop()
            .ok_or_else(|| ServerError::Internal("empty save outcome".into()))
    }

    /// Saves several envelopes under one lock.
    ///
    /// Each entry gets its own CAS check, so a conflict on one entry does not
    /// affect the others. An invalid entry (missing blob, corrupt payload)
    /// rejects the whole batch before anything is stored.
    pub fn save_batch(&self, envelopes: Vec<Envelope>) -> ServerResult<Vec<EnvelopeOutcome>> {
        let mut objects = self.objects.write();
        let mut blobs = self.blobs.write();

        let mut staged: HashMap<Uuid, Envelope> = HashMap::new();
        let mut order: Vec<Uuid> = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = envelope.id();
            let current = staged.get(&id).or_else(|| objects.get(&id));
            if current.map(Envelope::checksum) != envelope.previous_checksum() {
                debug!(%id, "cas conflict");
                outcomes.push(EnvelopeOutcome::Conflict {
                    id,
                    remote: current.filter(|_| self.embed_remote).cloned(),
                });
                continue;
            }
            let stored = self.inline(&blobs, &mut claimed, envelope)?;
            outcomes.push(EnvelopeOutcome::Accepted {
                id,
                checksum: stored.checksum(),
            });
            if staged.insert(id, stored).is_none() {
                order.push(id);
            }
        }

        for blob_ref in &claimed {
            blobs.remove(blob_ref);
        }
        for id in order {
            let Some(stored) = staged.remove(&id) else {
                continue;
            };
            debug!(%id, checksum = %stored.checksum(), "accepted");
            let received_at = self.tick();
            objects.insert(
                id,
                stored.with_previous_checksum(None).with_received_at(received_at),
            );
        }
        Ok(outcomes)
    }

    /// Fetches objects; unknown IDs are omitted.
    pub fn fetch_many(&self, ids: &[Uuid]) -> Vec<Envelope> {
        let objects = self.objects.read();
        ids.iter().filter_map(|id| objects.get(id).cloned()).collect()
    }

    /// Checksums of one type received strictly after `since`, oldest first.
    pub fn checksums_since(&self, type_tag: &str, since: Option<DateTime<Utc>>) -> Vec<ChecksumEntry> {
        let mut entries: Vec<ChecksumEntry> = self
            .objects
            .read()
            .values()
            .filter(|envelope| envelope.type_tag() == type_tag)
            .filter_map(|envelope| {
                let received_at = envelope.received_at()?;
                let fresh = since.map_or(true, |cursor| received_at > cursor);
                fresh.then_some(ChecksumEntry {
                    id: envelope.id(),
                    checksum: envelope.checksum(),
                    received_at,
                })
            })
            .collect();
        entries.sort_by_key(|entry| (entry.received_at, entry.id));
        entries
    }

    /// Stores uploaded blob bytes.
    pub fn put_blob(&self, blob_ref: impl Into<String>, bytes: Bytes) {
        self.blobs.write().insert(blob_ref.into(), bytes);
    }

    /// Deletes one object. Returns true if it existed.
    pub fn delete(&self, id: Uuid) -> bool {
        self.objects.write().remove(&id).is_some()
    }

    /// Deletes every object, or every object of one type. Returns the number
    /// removed.
    pub fn delete_all(&self, type_tag: Option<&str>) -> usize {
        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|_, envelope| type_tag.is_some_and(|tag| envelope.type_tag() != tag));
        before - objects.len()
    }

    /// Verifies an entry and resolves its blob reference to inline bytes.
    fn inline(
        &self,
        blobs: &HashMap<String, Bytes>,
        claimed: &mut HashSet<String>,
        envelope: Envelope,
    ) -> ServerResult<Envelope> {
        let id = envelope.id();
        let Some(blob_ref) = envelope.large_blob_ref().map(str::to_string) else {
            envelope.verify()?;
            return Ok(envelope);
        };
        let bytes = blobs
            .get(&blob_ref)
            .filter(|_| !claimed.contains(&blob_ref))
            .cloned()
            .ok_or_else(|| ServerError::MissingBlob {
                id,
                blob_ref: blob_ref.clone(),
            })?;
        let stored = envelope.with_inline_payload(bytes)?;
        claimed.insert(blob_ref);
        Ok(stored)
    }

    /// Next reception time, strictly after the previous one.
    fn tick(&self) -> DateTime<Utc> {
        let mut last = self.last_received.lock();
        let now = Utc::now();
        let next = match *last {
            Some(previous) if now <= previous => previous + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

impl Default for RemoteStore {
    fn default() -> Self {
        Self::new(true)
    }
}

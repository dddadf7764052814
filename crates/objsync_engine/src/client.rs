//! Remote store abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use objsync_protocol::wire::ChecksumEntry;
use objsync_protocol::{Envelope, EnvelopeOutcome, UploadSlot};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Talks to the remote object store.
///
/// Implementations own retries and timeouts; both surface as
/// [`SyncError::Transport`].
#[async_trait]
pub trait SyncClient: Send + Sync {
    /// Saves one envelope, subject to its CAS precondition.
    async fn save(&self, envelope: Envelope) -> SyncResult<EnvelopeOutcome>;

    /// Saves several envelopes; returns one outcome per envelope.
    async fn save_batch(&self, envelopes: Vec<Envelope>) -> SyncResult<Vec<EnvelopeOutcome>>;

    /// Fetches one object.
    async fn fetch(&self, id: Uuid) -> SyncResult<Option<Envelope>>;

    /// Fetches several objects; unknown IDs are omitted.
    async fn fetch_many(&self, ids: Vec<Uuid>) -> SyncResult<Vec<Envelope>>;

    /// Lists checksums of one type received after `since`.
    async fn fetch_checksums(
        &self,
        type_tag: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ChecksumEntry>>;

    /// Reserves a direct upload slot.
    async fn prepare_upload(&self, id: Uuid, size: u64) -> SyncResult<UploadSlot>;

    /// Uploads blob bytes to a slot.
    async fn put_blob(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        bytes: Bytes,
    ) -> SyncResult<()>;

    /// Deletes one object.
    async fn delete(&self, id: Uuid) -> SyncResult<()>;

    /// Deletes every object, or every object of one type.
    async fn delete_all(&self, type_tag: Option<&str>) -> SyncResult<()>;
}

/// Call counters of a [`MockClient`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCalls {
    /// Single saves.
    pub saves: u64,
    /// Batch saves.
    pub batches: u64,
    /// Fetches, single or many.
    pub fetches: u64,
    /// Blob uploads.
    pub uploads: u64,
}

/// An in-memory remote with CAS semantics, for tests.
#[derive(Default)]
pub struct MockClient {
    objects: RwLock<HashMap<Uuid, Envelope>>,
    blobs: RwLock<HashMap<String, Bytes>>,
    failures: Mutex<VecDeque<Option<SyncError>>>,
    batch_sizes: Mutex<Vec<usize>>,
    latency: Mutex<Option<Duration>>,
    cancel_after_batch: Mutex<Option<CancellationToken>>,
    embed_remote: bool,
    saves: AtomicU64,
    batches: AtomicU64,
    fetches: AtomicU64,
    uploads: AtomicU64,
}

impl MockClient {
    /// Creates an empty remote that embeds the remote version in conflicts.
    pub fn new() -> Self {
        Self {
            embed_remote: true,
            ..Self::default()
        }
    }

    /// Creates a remote whose conflicts carry no remote version.
    pub fn without_embedded_remote() -> Self {
        Self::default()
    }

    /// Stores an envelope as if another device had saved it.
    pub fn put_remote(&self, envelope: Envelope) {
        let envelope = envelope
            .with_previous_checksum(None)
            .with_received_at(Utc::now());
        self.objects.write().insert(envelope.id(), envelope);
    }

    /// Current remote version of an object.
    pub fn remote(&self, id: Uuid) -> Option<Envelope> {
        self.objects.read().get(&id).cloned()
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(Some(error));
    }

    /// Lets the next call through. Queued with [`fail_next`](Self::fail_next)
    /// to fail a later call.
    pub fn pass_next(&self) {
        self.failures.lock().push_back(None);
    }

    /// Delays every save before it reaches the remote.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Cancels `token` once the next batch save has been applied.
    pub fn cancel_after_batch(&self, token: CancellationToken) {
        *self.cancel_after_batch.lock() = Some(token);
    }

    /// Call counters.
    pub fn calls(&self) -> MockCalls {
        MockCalls {
            saves: self.saves.load(Ordering::SeqCst),
            batches: self.batches.load(Ordering::SeqCst),
            fetches: self.fetches.load(Ordering::SeqCst),
            uploads: self.uploads.load(Ordering::SeqCst),
        }
    }

    /// Sizes of every batch received, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn injected(&self) -> SyncResult<()> {
        match self.failures.lock().pop_front() {
            Some(Some(error)) => Err(error),
            _ => Ok(()),
        }
    }

    fn apply(&self, envelope: Envelope) -> EnvelopeOutcome {
        let mut objects = self.objects.write();
        let current = objects.get(&envelope.id());
        if current.map(Envelope::checksum) != envelope.previous_checksum() {
            return EnvelopeOutcome::Conflict {
                id: envelope.id(),
                remote: current.filter(|_| self.embed_remote).cloned(),
            };
        }
        let stored = match envelope.large_blob_ref() {
            Some(blob_ref) => match self.blobs.read().get(blob_ref) {
                Some(bytes) => match envelope.clone().with_inline_payload(bytes.clone()) {
                    Ok(inlined) => inlined,
                    Err(_) => return self.reject(envelope),
                },
                None => return self.reject(envelope),
            },
            None => envelope,
        };
        let outcome = EnvelopeOutcome::Accepted {
            id: stored.id(),
            checksum: stored.checksum(),
        };
        objects.insert(
            stored.id(),
            stored.with_previous_checksum(None).with_received_at(Utc::now()),
        );
        outcome
    }

    fn reject(&self, envelope: Envelope) -> EnvelopeOutcome {
        EnvelopeOutcome::Conflict {
            id: envelope.id(),
            remote: None,
        }
    }
}

#[async_trait]
impl SyncClient for MockClient {
    async fn save(&self, envelope: Envelope) -> SyncResult<EnvelopeOutcome> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.injected()?;
        self.delay().await;
        Ok(self.apply(envelope))
    }

    async fn save_batch(&self, envelopes: Vec<Envelope>) -> SyncResult<Vec<EnvelopeOutcome>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().push(envelopes.len());
        self.injected()?;
        self.delay().await;
        let outcomes = envelopes.into_iter().map(|e| self.apply(e)).collect();
        if let Some(token) = self.cancel_after_batch.lock().take() {
            token.cancel();
        }
        Ok(outcomes)
    }

    async fn fetch(&self, id: Uuid) -> SyncResult<Option<Envelope>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.injected()?;
        Ok(self.remote(id))
    }

    async fn fetch_many(&self, ids: Vec<Uuid>) -> SyncResult<Vec<Envelope>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.injected()?;
        let objects = self.objects.read();
        Ok(ids.iter().filter_map(|id| objects.get(id).cloned()).collect())
    }

    async fn fetch_checksums(
        &self,
        type_tag: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ChecksumEntry>> {
        self.injected()?;
        Ok(self
            .objects
            .read()
            .values()
            .filter(|e| e.type_tag() == type_tag)
            .filter_map(|e| {
                let received_at = e.received_at()?;
                let fresh = since.map_or(true, |cursor| received_at > cursor);
                fresh.then_some(ChecksumEntry {
                    id: e.id(),
                    checksum: e.checksum(),
                    received_at,
                })
            })
            .collect())
    }

    async fn prepare_upload(&self, id: Uuid, _size: u64) -> SyncResult<UploadSlot> {
        self.injected()?;
        let blob_ref = format!("blob-{id}");
        Ok(UploadSlot::new(id, format!("mock://upload/{blob_ref}"), blob_ref))
    }

    async fn put_blob(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        bytes: Bytes,
    ) -> SyncResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.injected()?;
        let blob_ref = url
            .strip_prefix("mock://upload/")
            .ok_or_else(|| SyncError::Upload(format!("unknown upload url {url}")))?;
        self.blobs.write().insert(blob_ref.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        self.injected()?;
        self.objects.write().remove(&id);
        Ok(())
    }

    async fn delete_all(&self, type_tag: Option<&str>) -> SyncResult<()> {
        self.injected()?;
        self.objects
            .write()
            .retain(|_, e| type_tag.is_some_and(|tag| e.type_tag() != tag));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objsync_protocol::Timestamps;

    fn envelope(id: Uuid, body: &'static [u8]) -> Envelope {
        Envelope::seal(id, "doc", Bytes::from_static(body), Timestamps::now())
    }

    #[tokio::test]
    async fn mock_enforces_cas() {
        let client = MockClient::new();
        let id = Uuid::new_v4();

        let first = client.save(envelope(id, b"v1")).await.unwrap();
        assert!(first.is_accepted());

        let stale = client.save(envelope(id, b"v2")).await.unwrap();
        let EnvelopeOutcome::Conflict { remote, .. } = stale else {
            panic!("expected conflict");
        };
        assert_eq!(remote.unwrap().checksum(), envelope(id, b"v1").checksum());

        let fresh = envelope(id, b"v2").with_previous_checksum(Some(envelope(id, b"v1").checksum()));
        assert!(client.save(fresh).await.unwrap().is_accepted());
        assert_eq!(client.calls().saves, 3);
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() {
        let client = MockClient::new();
        client.fail_next(SyncError::transport_retryable("offline"));

        assert!(client.fetch(Uuid::new_v4()).await.is_err());
        assert!(client.fetch(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_all_by_type() {
        let client = MockClient::new();
        client.put_remote(envelope(Uuid::new_v4(), b"a"));
        client.delete_all(Some("other")).await.unwrap();
        assert_eq!(client.objects.read().len(), 1);
        client.delete_all(Some("doc")).await.unwrap();
        assert!(client.objects.read().is_empty());
    }
}

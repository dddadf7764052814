//! Outbound sync: single and batch saves with CAS conflict handling.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{BatchFailure, ItemFailure, SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::object::SyncObject;
use futures::stream::{self, StreamExt};
use objsync_codec::Checksum;
use objsync_protocol::{ConflictPolicy, Envelope, EnvelopeOutcome};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-call options for saves.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Send even if the content matches the stored checksum.
    pub force: bool,
    /// Aborts the save when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl SaveOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Options that bypass the unchanged-content check.
    pub fn forced() -> Self {
        Self {
            force: true,
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Statistics about outbound sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Envelopes acknowledged by the remote.
    pub saved: u64,
    /// Saves skipped because nothing changed.
    pub unchanged: u64,
    /// CAS conflicts encountered.
    pub conflicts: u64,
    /// Envelopes resent after a conflict.
    pub resends: u64,
    /// Batch calls made.
    pub batches: u64,
    /// Payloads sent through direct upload.
    pub direct_uploads: u64,
    /// Saves that ended in an error.
    pub failures: u64,
}

/// One object travelling through a batch round.
struct Pending<T> {
    object: T,
    envelope: Envelope,
}

enum Resolution<T> {
    Resend(Pending<T>),
    /// The resolved content already equals the remote version.
    Settled(Envelope),
}

/// Saves objects of type `T` to the remote.
pub struct SyncEngine<T: SyncObject> {
    ctx: SyncContext<T>,
    config: SyncConfig,
    stats: RwLock<SyncStats>,
}

impl<T: SyncObject> SyncEngine<T> {
    /// Creates an engine.
    pub fn new(ctx: SyncContext<T>, config: SyncConfig) -> Self {
        Self {
            ctx,
            config,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &SyncContext<T> {
        &self.ctx
    }

    /// The configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Seals an object with its stored checksum as CAS precondition.
    pub fn build_envelope(&self, object: &T) -> SyncResult<Envelope> {
        let previous = self.ctx.checksums.get(object.id())?;
        Ok(self.ctx.seal(object)?.with_previous_checksum(previous))
    }

    /// Saves one object.
    pub async fn save(&self, object: &T) -> SyncResult<Envelope> {
        self.save_with(object, &SaveOptions::default()).await
    }

    /// Saves one object with explicit options.
    pub async fn save_with(&self, object: &T, options: &SaveOptions) -> SyncResult<Envelope> {
        let id = object.id();
        let cancel = options.cancel.as_ref();
        let _guard = cancellable(cancel, async { Ok(self.ctx.locks.lock(id).await) }).await?;

        let envelope = self.build_envelope(object)?;
        if !options.force && envelope.previous_checksum() == Some(envelope.checksum()) {
            debug!(%id, type_tag = T::TYPE_TAG, "content unchanged, skipping save");
            self.stats.write().unchanged += 1;
            self.ctx.emit(SyncEvent::Unchanged { id });
            return Ok(envelope);
        }

        let result = self.send_single(object.clone(), envelope, cancel).await;
        if let Err(err) = &result {
            self.stats.write().failures += 1;
            self.ctx.emit(SyncEvent::Failed {
                id,
                message: err.to_string(),
            });
        }
        result
    }

    async fn send_single(
        &self,
        object: T,
        envelope: Envelope,
        cancel: Option<&CancellationToken>,
    ) -> SyncResult<Envelope> {
        let id = object.id();
        let mut current = Pending { object, envelope };
        let mut resends = 0;

        loop {
            let outbound = self.upload_if_large(current.envelope.clone(), cancel).await?;
            let outcome = cancellable(cancel, self.ctx.client.save(outbound.clone())).await?;

            let remote = match outcome {
                EnvelopeOutcome::Accepted { checksum, .. } => {
                    self.acknowledge(id, checksum)?;
                    return Ok(current.envelope);
                }
                EnvelopeOutcome::Conflict { remote, .. } => remote,
            };

            self.stats.write().conflicts += 1;
            self.ctx.emit(SyncEvent::Conflict { id });
            debug!(%id, resends, policy = ?self.config.conflict_policy, "save conflicted");

            if !self.config.conflict_policy.resends() {
                let remote = match remote {
                    Some(remote) => Some(remote),
                    None => cancellable(cancel, self.ctx.client.fetch(id)).await?,
                };
                return Err(SyncError::conflict(current.envelope, remote));
            }

            if resends >= self.config.max_conflict_resends {
                warn!(%id, resends, "giving up after repeated conflicts");
                return Err(SyncError::ConflictRetriesExhausted {
                    id,
                    attempts: resends,
                });
            }
            resends += 1;

            let remote = match remote {
                Some(remote) => Some(remote),
                None => cancellable(cancel, self.ctx.client.fetch(id)).await?,
            };
            match self.resolve(current.object, remote)? {
                Resolution::Resend(next) => {
                    self.stats.write().resends += 1;
                    self.ctx.emit(SyncEvent::Resent {
                        id,
                        attempt: resends,
                    });
                    current = next;
                }
                Resolution::Settled(envelope) => return Ok(envelope),
            }
        }
    }

    /// Turns a conflicted object into the envelope to resend.
    ///
    /// A missing remote means the object was deleted remotely, so it is
    /// resent as new. The stored checksum is left alone until the resend is
    /// acknowledged.
    fn resolve(&self, local: T, remote: Option<Envelope>) -> SyncResult<Resolution<T>> {
        let id = local.id();
        let Some(remote) = remote else {
            let envelope = self.ctx.seal(&local)?;
            return Ok(Resolution::Resend(Pending {
                object: local,
                envelope,
            }));
        };

        let object = match self.config.conflict_policy {
            ConflictPolicy::Merge => {
                let remote_object = self.ctx.unseal(&remote)?;
                self.ctx.resolver.merge(&local, &remote_object)
            }
            _ => local,
        };
        let envelope = self.ctx.seal(&object)?.with_previous_checksum(Some(remote.checksum()));
        if envelope.checksum() == remote.checksum() {
            self.acknowledge(id, remote.checksum())?;
            return Ok(Resolution::Settled(envelope));
        }
        Ok(Resolution::Resend(Pending { object, envelope }))
    }

    fn acknowledge(&self, id: Uuid, checksum: Checksum) -> SyncResult<()> {
        self.ctx.checksums.set(id, checksum)?;
        self.stats.write().saved += 1;
        self.ctx.emit(SyncEvent::Saved { id, checksum });
        Ok(())
    }

    async fn upload_if_large(
        &self,
        envelope: Envelope,
        cancel: Option<&CancellationToken>,
    ) -> SyncResult<Envelope> {
        let size = envelope.payload_len();
        if size <= self.config.direct_upload_threshold {
            return Ok(envelope);
        }
        let Some(payload) = envelope.payload().cloned() else {
            return Ok(envelope);
        };
        let id = envelope.id();
        let upload = async {
            let slot = self
                .ctx
                .client
                .prepare_upload(id, size as u64)
                .await
                .map_err(upload_error)?;
            self.ctx
                .client
                .put_blob(&slot.upload_url, &slot.headers, payload)
                .await
                .map_err(upload_error)?;
            Ok(slot.blob_ref)
        };
        let blob_ref = cancellable(cancel, upload).await?;
        debug!(%id, size, "payload uploaded directly");
        self.stats.write().direct_uploads += 1;
        self.ctx.emit(SyncEvent::Uploaded { id, bytes: size });
        Ok(envelope.into_blob_ref(blob_ref))
    }

    /// Saves several objects.
    ///
    /// Returns every acknowledged envelope, or
    /// [`SyncError::MultipleErrors`] listing accepted and failed entries.
    pub async fn save_all(&self, objects: &[T]) -> SyncResult<Vec<Envelope>> {
        self.save_all_with(objects, &SaveOptions::default()).await
    }

    /// Saves several objects with explicit options.
    pub async fn save_all_with(
        &self,
        objects: &[T],
        options: &SaveOptions,
    ) -> SyncResult<Vec<Envelope>> {
        let objects = dedup_last_wins(objects);
        let total = objects.len();
        let mut report = BatchFailure::default();

        for (index, chunk) in objects.chunks(self.config.max_batch_size).enumerate() {
            let ids: Vec<Uuid> = chunk.iter().map(|object| object.id()).collect();
            let cancel = options.cancel.as_ref();
            let _guards =
                cancellable(cancel, async { Ok(self.ctx.locks.lock_many(&ids).await) }).await?;

            let (accepted_before, failed_before) = (report.accepted.len(), report.failed.len());
            if let Err(err) = self.save_chunk(chunk, options, &mut report).await {
                if index == 0 || matches!(err, SyncError::Cancelled) {
                    return Err(err);
                }
                let settled: HashSet<Uuid> = report.accepted[accepted_before..]
                    .iter()
                    .map(Envelope::id)
                    .chain(report.failed[failed_before..].iter().map(|f| f.id))
                    .collect();
                let unsettled: Vec<Uuid> =
                    ids.into_iter().filter(|id| !settled.contains(id)).collect();
                fail_all(&mut report, unsettled.into_iter(), &err);
            }
            self.ctx.emit(SyncEvent::Progress {
                done: report.len(),
                total,
            });
        }
        self.ctx.locks.prune();

        info!(
            type_tag = T::TYPE_TAG,
            accepted = report.accepted.len(),
            failed = report.failed.len(),
            "batch save finished"
        );
        if report.failed.is_empty() {
            Ok(report.accepted)
        } else {
            self.stats.write().failures += report.failed.len() as u64;
            for item in &report.failed {
                self.ctx.emit(SyncEvent::Failed {
                    id: item.id,
                    message: item.error.to_string(),
                });
            }
            Err(SyncError::MultipleErrors(Box::new(report)))
        }
    }

    /// Runs the rounds of one chunk.
    ///
    /// An error is returned only if the first round failed as a whole, or on
    /// cancellation; everything else is recorded in `report`.
    async fn save_chunk(
        &self,
        chunk: &[T],
        options: &SaveOptions,
        report: &mut BatchFailure,
    ) -> SyncResult<()> {
        let cancel = options.cancel.as_ref();
        let mut pending = Vec::with_capacity(chunk.len());
        for object in chunk {
            match self.build_envelope(object) {
                Ok(envelope)
                    if !options.force
                        && envelope.previous_checksum() == Some(envelope.checksum()) =>
                {
                    self.stats.write().unchanged += 1;
                    self.ctx.emit(SyncEvent::Unchanged { id: object.id() });
                    report.accepted.push(envelope);
                }
                Ok(envelope) => pending.push(Pending {
                    object: object.clone(),
                    envelope,
                }),
                Err(error) => report.failed.push(ItemFailure {
                    id: object.id(),
                    error,
                }),
            }
        }

        let mut round = 0u32;
        while !pending.is_empty() {
            if options.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let sent = self.upload_all(pending, cancel, report).await?;
            if sent.is_empty() {
                break;
            }
            let envelopes: Vec<Envelope> = sent.iter().map(|p| p.envelope.clone()).collect();
            debug!(type_tag = T::TYPE_TAG, round, size = envelopes.len(), "sending batch");
            self.stats.write().batches += 1;

            let outcomes = match cancellable(cancel, self.ctx.client.save_batch(envelopes)).await {
                Ok(outcomes) => outcomes,
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(err) if round == 0 => return Err(err),
                Err(err) => {
                    warn!(round, error = %err, "follow-up batch failed");
                    fail_all(report, sent.iter().map(|p| p.envelope.id()), &err);
                    break;
                }
            };

            let mut by_id: HashMap<Uuid, EnvelopeOutcome> =
                outcomes.into_iter().map(|o| (o.id(), o)).collect();
            let mut conflicts = Vec::new();
            for item in sent {
                let id = item.envelope.id();
                match by_id.remove(&id) {
                    Some(EnvelopeOutcome::Accepted { checksum, .. }) => {
                        match self.acknowledge(id, checksum) {
                            Ok(()) => report.accepted.push(item.envelope),
                            Err(error) => report.failed.push(ItemFailure { id, error }),
                        }
                    }
                    Some(EnvelopeOutcome::Conflict { remote, .. }) => {
                        self.stats.write().conflicts += 1;
                        self.ctx.emit(SyncEvent::Conflict { id });
                        conflicts.push((item, remote));
                    }
                    None => report.failed.push(ItemFailure {
                        id,
                        error: SyncError::Protocol(format!("no outcome for {id}")),
                    }),
                }
            }
            if conflicts.is_empty() {
                break;
            }

            let policy = self.config.conflict_policy;
            if policy.resends() && round >= self.config.max_conflict_resends {
                for (item, _) in conflicts {
                    let id = item.envelope.id();
                    report.failed.push(ItemFailure {
                        id,
                        error: SyncError::ConflictRetriesExhausted {
                            id,
                            attempts: round,
                        },
                    });
                }
                break;
            }

            let resolved = self.fetch_missing_remotes(conflicts, cancel).await;
            pending = Vec::new();
            for (item, remote) in resolved {
                let id = item.envelope.id();
                let remote = match remote {
                    Ok(remote) => remote,
                    Err(error) => {
                        report.failed.push(ItemFailure { id, error });
                        continue;
                    }
                };
                if !policy.resends() {
                    report.failed.push(ItemFailure {
                        id,
                        error: SyncError::conflict(item.envelope, remote),
                    });
                    continue;
                }
                match self.resolve(item.object, remote) {
                    Ok(Resolution::Resend(next)) => {
                        self.stats.write().resends += 1;
                        self.ctx.emit(SyncEvent::Resent {
                            id,
                            attempt: round + 1,
                        });
                        pending.push(next);
                    }
                    Ok(Resolution::Settled(envelope)) => report.accepted.push(envelope),
                    Err(error) => report.failed.push(ItemFailure { id, error }),
                }
            }
            round += 1;
        }
        Ok(())
    }

    /// Moves oversized payloads to blob storage, bounded by
    /// `max_concurrent_requests`. Failed uploads are recorded in `report`.
    async fn upload_all(
        &self,
        pending: Vec<Pending<T>>,
        cancel: Option<&CancellationToken>,
        report: &mut BatchFailure,
    ) -> SyncResult<Vec<Pending<T>>> {
        let uploads = stream::iter(pending.into_iter().map(|item| async move {
            let envelope = self.upload_if_large(item.envelope.clone(), cancel).await;
            (item, envelope)
        }))
        .buffer_unordered(self.config.max_concurrent_requests)
        .collect::<Vec<_>>()
        .await;

        let mut sent = Vec::with_capacity(uploads.len());
        for (item, envelope) in uploads {
            match envelope {
                Ok(envelope) => sent.push(Pending {
                    object: item.object,
                    envelope,
                }),
                Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
                Err(error) => report.failed.push(ItemFailure {
                    id: item.envelope.id(),
                    error,
                }),
            }
        }
        Ok(sent)
    }

    /// Fetches the remote version of conflicts that did not embed it,
    /// bounded by `max_concurrent_requests`.
    async fn fetch_missing_remotes(
        &self,
        conflicts: Vec<(Pending<T>, Option<Envelope>)>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<(Pending<T>, SyncResult<Option<Envelope>>)> {
        stream::iter(conflicts.into_iter().map(|(item, remote)| async move {
            let remote = match remote {
                Some(remote) => Ok(Some(remote)),
                None => cancellable(cancel, self.ctx.client.fetch(item.envelope.id())).await,
            };
            (item, remote)
        }))
        .buffer_unordered(self.config.max_concurrent_requests)
        .collect()
        .await
    }

    /// Fetches and decodes the remote version of an object.
    pub async fn fetch(&self, id: Uuid) -> SyncResult<Option<T>> {
        let Some(envelope) = self.ctx.client.fetch(id).await? else {
            return Ok(None);
        };
        check_type::<T>(&envelope)?;
        Ok(Some(self.ctx.unseal(&envelope)?))
    }

    /// Re-reads the remote checksum of an object into the checksum store.
    pub async fn refresh(&self, id: Uuid) -> SyncResult<Option<Checksum>> {
        let _guard = self.ctx.locks.lock(id).await;
        match self.ctx.client.fetch(id).await? {
            Some(envelope) => {
                self.ctx.checksums.set(id, envelope.checksum())?;
                Ok(Some(envelope.checksum()))
            }
            None => {
                self.ctx.checksums.delete(id)?;
                Ok(None)
            }
        }
    }

    /// Marks an object deleted and saves the tombstone.
    pub async fn tombstone(&self, object: &T) -> SyncResult<Envelope> {
        let tombstone = object.tombstoned(chrono::Utc::now());
        self.ctx.local.persist(&tombstone)?;
        self.save(&tombstone).await
    }

    /// Deletes an object remotely and forgets its checksum.
    pub async fn delete(&self, id: Uuid) -> SyncResult<()> {
        let _guard = self.ctx.locks.lock(id).await;
        self.ctx.client.delete(id).await?;
        self.ctx.checksums.delete(id)?;
        info!(%id, type_tag = T::TYPE_TAG, "deleted remotely");
        Ok(())
    }

    /// Deletes every remote object of this type and forgets the checksums
    /// of every locally known one.
    pub async fn delete_all(&self) -> SyncResult<()> {
        self.ctx.client.delete_all(Some(T::TYPE_TAG)).await?;
        let ids = self.ctx.local.ids()?;
        for id in &ids {
            self.ctx.checksums.delete(*id)?;
        }
        info!(type_tag = T::TYPE_TAG, forgotten = ids.len(), "deleted all remotely");
        Ok(())
    }
}

/// Rejects envelopes of another type.
pub(crate) fn check_type<T: SyncObject>(envelope: &Envelope) -> SyncResult<()> {
    if envelope.type_tag() != T::TYPE_TAG {
        return Err(SyncError::InvalidType {
            expected: T::TYPE_TAG.to_string(),
            found: envelope.type_tag().to_string(),
        });
    }
    Ok(())
}

/// Races `future` against the token.
pub(crate) async fn cancellable<R>(
    cancel: Option<&CancellationToken>,
    future: impl Future<Output = SyncResult<R>>,
) -> SyncResult<R> {
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(SyncError::Cancelled),
                result = future => result,
            }
        }
        None => future.await,
    }
}

fn upload_error(err: SyncError) -> SyncError {
    match err {
        SyncError::Cancelled | SyncError::Upload(_) => err,
        other => SyncError::Upload(other.to_string()),
    }
}

fn fail_all(report: &mut BatchFailure, ids: impl Iterator<Item = Uuid>, err: &SyncError) {
    for id in ids {
        report.failed.push(ItemFailure {
            id,
            error: err.clone(),
        });
    }
}

/// Keeps the last occurrence of every ID, at the position of the first.
fn dedup_last_wins<T: SyncObject>(objects: &[T]) -> Vec<T> {
    let mut positions: HashMap<Uuid, usize> = HashMap::with_capacity(objects.len());
    let mut unique: Vec<T> = Vec::with_capacity(objects.len());
    for object in objects {
        match positions.get(&object.id()) {
            Some(&index) => unique[index] = object.clone(),
            None => {
                positions.insert(object.id(), unique.len());
                unique.push(object.clone());
            }
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_store::{ChecksumStore, MemoryChecksumStore};
    use crate::client::{MockClient, SyncClient};
    use crate::local_store::MemoryLocalStore;
    use crate::object::{checksum_of, seal};
    use crate::test_support::Doc;
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        client: Arc<MockClient>,
        checksums: Arc<MemoryChecksumStore>,
        engine: SyncEngine<Doc>,
    }

    fn harness(client: MockClient, config: SyncConfig) -> Harness {
        let client = Arc::new(client);
        let checksums = Arc::new(MemoryChecksumStore::new());
        let local = Arc::new(MemoryLocalStore::<Doc>::new());
        let ctx = SyncContext::new(client.clone(), checksums.clone(), local);
        Harness {
            client,
            checksums,
            engine: SyncEngine::new(ctx, config),
        }
    }

    fn default_harness() -> Harness {
        harness(MockClient::new(), SyncConfig::default())
    }

    /// Simulates another device saving `doc` on top of whatever is there.
    fn advance_remote(client: &MockClient, doc: &Doc) {
        client.put_remote(seal(doc).unwrap());
    }

    #[tokio::test]
    async fn new_object_is_one_call() {
        let h = default_harness();
        let doc = Doc::new("Doc 1");

        let envelope = h.engine.save(&doc).await.unwrap();
        assert_eq!(envelope.previous_checksum(), None);
        assert_eq!(h.client.calls().saves, 1);
        assert_eq!(h.checksums.get(doc.id).unwrap(), Some(envelope.checksum()));
    }

    #[tokio::test]
    async fn unchanged_object_is_not_sent_again() {
        let h = default_harness();
        let doc = Doc::new("Doc 1");
        h.engine.save(&doc).await.unwrap();
        h.engine.save(&doc).await.unwrap();
        assert_eq!(h.client.calls().saves, 1);
        assert_eq!(h.engine.stats().unchanged, 1);

        h.engine.save_with(&doc, &SaveOptions::forced()).await.unwrap();
        assert_eq!(h.client.calls().saves, 2);
    }

    #[tokio::test]
    async fn stale_save_is_replaced_after_one_conflict() {
        let h = default_harness();
        let mut doc = Doc::new("Doc 1");
        h.engine.save(&doc).await.unwrap();

        let mut other = doc.clone();
        other.body = "from another device".into();
        advance_remote(&h.client, &other);

        doc.body = "local edit".into();
        let envelope = h.engine.save(&doc).await.unwrap();

        assert_eq!(h.client.calls().saves, 3);
        assert_eq!(envelope.previous_checksum(), Some(checksum_of(&other).unwrap()));
        let remote = h.client.remote(doc.id).unwrap();
        assert_eq!(remote.checksum(), checksum_of(&doc).unwrap());
        assert_eq!(h.checksums.get(doc.id).unwrap(), Some(remote.checksum()));
        assert_eq!(h.engine.stats().resends, 1);
    }

    #[tokio::test]
    async fn missing_remote_is_fetched_for_replace() {
        let h = harness(MockClient::without_embedded_remote(), SyncConfig::default());
        let mut doc = Doc::new("Doc 1");
        h.engine.save(&doc).await.unwrap();
        advance_remote(&h.client, &Doc { body: "other".into(), ..doc.clone() });

        doc.body = "mine".into();
        h.engine.save(&doc).await.unwrap();
        assert_eq!(h.client.calls().fetches, 1);
        assert_eq!(
            h.client.remote(doc.id).unwrap().checksum(),
            checksum_of(&doc).unwrap()
        );
    }

    #[tokio::test]
    async fn remote_deleted_object_is_resent_as_new() {
        let h = default_harness();
        let mut doc = Doc::new("Doc 1");
        h.engine.save(&doc).await.unwrap();
        h.client.delete(doc.id).await.unwrap();

        doc.body = "edited".into();
        let envelope = h.engine.save(&doc).await.unwrap();
        assert_eq!(envelope.previous_checksum(), None);
        assert!(h.client.remote(doc.id).is_some());
    }

    #[tokio::test]
    async fn failed_resend_after_remote_delete_keeps_checksum() {
        let h = default_harness();
        let mut doc = Doc::new("Doc 1");
        let first = h.engine.save(&doc).await.unwrap();
        h.client.delete(doc.id).await.unwrap();

        // save conflicts, fetch finds nothing, the resend fails
        h.client.pass_next();
        h.client.pass_next();
        h.client.fail_next(SyncError::transport_retryable("connection reset"));
        doc.body = "edited".into();
        let err = h.engine.save(&doc).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(h.client.calls().fetches, 1);
        assert_eq!(h.checksums.get(doc.id).unwrap(), Some(first.checksum()));
        assert!(h.client.remote(doc.id).is_none());
    }

    #[tokio::test]
    async fn cancel_during_call_stores_nothing() {
        let h = default_harness();
        h.client.set_latency(Duration::from_millis(500));
        let doc = Doc::new("Doc 1");
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = h
            .engine
            .save_with(&doc, &SaveOptions::new().with_cancel(token))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(h.client.calls().saves, 1);
        assert_eq!(h.checksums.get(doc.id).unwrap(), None);
        assert!(h.client.remote(doc.id).is_none());
    }

    #[tokio::test]
    async fn batch_cancelled_between_rounds_keeps_accepted_checksums() {
        let h = default_harness();
        let docs: Vec<Doc> = (0..3).map(|i| Doc::new(&format!("Doc {i}"))).collect();
        advance_remote(
            &h.client,
            &Doc {
                body: "theirs".into(),
                ..docs[1].clone()
            },
        );
        let token = CancellationToken::new();
        h.client.cancel_after_batch(token.clone());

        let err = h
            .engine
            .save_all_with(&docs, &SaveOptions::new().with_cancel(token))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(h.client.batch_sizes(), vec![3]);
        for doc in [&docs[0], &docs[2]] {
            assert_eq!(h.checksums.get(doc.id).unwrap(), Some(checksum_of(doc).unwrap()));
        }
        assert_eq!(h.checksums.get(docs[1].id).unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_object_are_serialized() {
        let h = default_harness();
        h.client.set_latency(Duration::from_millis(30));
        let doc = Doc::new("Doc 1");
        let first = Doc {
            body: "first".into(),
            ..doc.clone()
        };
        let second = Doc {
            body: "second".into(),
            ..doc.clone()
        };

        let (a, b) = tokio::join!(h.engine.save(&first), h.engine.save(&second));

        assert_eq!(a.unwrap().previous_checksum(), None);
        assert_eq!(b.unwrap().previous_checksum(), Some(checksum_of(&first).unwrap()));
        assert_eq!(h.engine.stats().conflicts, 0);
        assert_eq!(h.client.calls().saves, 2);
        assert_eq!(
            h.client.remote(doc.id).unwrap().checksum(),
            checksum_of(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn fetch_remote_and_error_leaves_state_untouched() {
        let config = SyncConfig::new().with_conflict_policy(ConflictPolicy::FetchRemoteAndError);
        let h = harness(MockClient::without_embedded_remote(), config);
        let mut doc = Doc::new("Doc 1");
        let first = h.engine.save(&doc).await.unwrap();

        let other = Doc {
            body: "theirs".into(),
            ..doc.clone()
        };
        advance_remote(&h.client, &other);
        doc.body = "mine".into();

        let err = h.engine.save(&doc).await.unwrap_err();
        let details = err.conflict_details().unwrap();
        let remote: Doc = details.decode_remote().unwrap().unwrap();
        assert_eq!(remote.body, "theirs");
        assert_eq!(h.checksums.get(doc.id).unwrap(), Some(first.checksum()));
        assert_eq!(h.client.calls().saves, 2);
    }

    #[tokio::test]
    async fn merge_policy_uses_resolver() {
        let client = Arc::new(MockClient::new());
        let checksums = Arc::new(MemoryChecksumStore::new());
        let ctx = SyncContext::new(
            client.clone(),
            checksums,
            Arc::new(MemoryLocalStore::<Doc>::new()),
        )
        .with_resolver(|local: &Doc, remote: &Doc| Doc {
            body: format!("{}|{}", remote.body, local.body),
            ..local.clone()
        });
        let engine = SyncEngine::new(
            ctx,
            SyncConfig::new().with_conflict_policy(ConflictPolicy::Merge),
        );

        let mut doc = Doc::new("Doc 1");
        engine.save(&doc).await.unwrap();
        advance_remote(&client, &Doc { body: "a".into(), ..doc.clone() });
        doc.body = "b".into();

        engine.save(&doc).await.unwrap();
        let stored: Doc = client.remote(doc.id).unwrap().decode().unwrap();
        assert_eq!(stored.body, "a|b");
    }

    #[tokio::test]
    async fn transport_error_leaves_checksum_untouched() {
        let h = default_harness();
        let doc = Doc::new("Doc 1");
        h.client.fail_next(SyncError::transport_retryable("offline"));

        let err = h.engine.save(&doc).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.checksums.get(doc.id).unwrap(), None);
        assert_eq!(h.engine.stats().failures, 1);
    }

    #[tokio::test]
    async fn cancelled_save_never_stores_checksum() {
        let h = default_harness();
        let token = CancellationToken::new();
        token.cancel();

        let err = h
            .engine
            .save_with(&Doc::new("Doc 1"), &SaveOptions::new().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(h.checksums.is_empty());
        assert_eq!(h.client.calls().saves, 0);
    }

    #[tokio::test]
    async fn large_payload_goes_through_direct_upload() {
        let h = harness(
            MockClient::new(),
            SyncConfig::new().with_direct_upload_threshold(32),
        );
        let doc = Doc {
            body: "x".repeat(256),
            ..Doc::new("Big")
        };

        let envelope = h.engine.save(&doc).await.unwrap();
        assert_eq!(h.client.calls().uploads, 1);
        assert_eq!(envelope.checksum(), checksum_of(&doc).unwrap());
        let remote: Doc = h.client.remote(doc.id).unwrap().decode().unwrap();
        assert_eq!(remote, doc);
    }

    #[tokio::test]
    async fn batch_resends_only_conflicted_entries() {
        let h = default_harness();
        let mut docs: Vec<Doc> = (0..5).map(|i| Doc::new(&format!("Doc {i}"))).collect();
        h.engine.save_all(&docs).await.unwrap();

        advance_remote(&h.client, &Doc { body: "elsewhere".into(), ..docs[2].clone() });
        for doc in &mut docs {
            doc.body = "edited".into();
        }

        let accepted = h.engine.save_all(&docs).await.unwrap();
        assert_eq!(accepted.len(), 5);
        assert_eq!(h.client.batch_sizes(), vec![5, 5, 1]);
        for doc in &docs {
            assert_eq!(
                h.checksums.get(doc.id).unwrap(),
                Some(checksum_of(doc).unwrap())
            );
        }
    }

    #[tokio::test]
    async fn batch_dedups_and_chunks() {
        let h = harness(MockClient::new(), SyncConfig::new().with_max_batch_size(2));
        let first = Doc::new("Doc 1");
        let mut again = first.clone();
        again.body = "last wins".into();
        let docs = vec![first, Doc::new("Doc 2"), Doc::new("Doc 3"), again.clone()];

        h.engine.save_all(&docs).await.unwrap();
        assert_eq!(h.client.batch_sizes(), vec![2, 1]);
        let remote: Doc = h.client.remote(again.id).unwrap().decode().unwrap();
        assert_eq!(remote.body, "last wins");
    }

    #[tokio::test]
    async fn batch_first_round_transport_error_is_returned_unchanged() {
        let h = default_harness();
        h.client.fail_next(SyncError::transport_fatal("bad request"));

        let err = h
            .engine
            .save_all(&[Doc::new("a"), Doc::new("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
        assert!(h.checksums.is_empty());
    }

    #[tokio::test]
    async fn batch_exhausted_conflicts_are_reported_per_item() {
        let h = harness(
            MockClient::new(),
            SyncConfig::new().with_max_conflict_resends(0),
        );
        let mut docs = vec![Doc::new("a"), Doc::new("b")];
        h.engine.save_all(&docs).await.unwrap();
        advance_remote(&h.client, &Doc { body: "remote".into(), ..docs[1].clone() });
        for doc in &mut docs {
            doc.body = "local".into();
        }

        let err = h.engine.save_all(&docs).await.unwrap_err();
        let SyncError::MultipleErrors(failure) = err else {
            panic!("expected MultipleErrors");
        };
        assert_eq!(failure.accepted.len(), 1);
        assert_eq!(failure.failed.len(), 1);
        assert!(matches!(
            failure.error_for(docs[1].id),
            Some(SyncError::ConflictRetriesExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn delete_forgets_checksum() {
        let h = default_harness();
        let doc = Doc::new("Doc 1");
        h.engine.save(&doc).await.unwrap();

        h.engine.delete(doc.id).await.unwrap();
        assert!(h.client.remote(doc.id).is_none());
        assert_eq!(h.checksums.get(doc.id).unwrap(), None);
    }

    #[test]
    fn dedup_keeps_first_position() {
        let a = Doc::new("a");
        let b = Doc::new("b");
        let mut a2 = a.clone();
        a2.body = "2".into();
        let unique = dedup_last_wins(&[a, b.clone(), a2.clone()]);
        assert_eq!(unique, vec![a2, b]);
    }
}

//! Inbound sync: reconciling remote envelopes with local state.
//!
//! Every received envelope ends in exactly one [`ReceiveOutcome`]. Local
//! changes made while reconciling (tombstones, renames, merges) are pushed
//! back with a single batch save once all envelopes were applied.

use crate::config::{CollisionPolicy, ReceiveConfig};
use crate::engine::{check_type, SyncEngine};
use crate::error::{ItemFailure, SyncError, SyncResult};
use crate::events::SyncEvent;
use crate::object::SyncObject;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use objsync_protocol::Envelope;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What receiving one envelope did locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Content already known; nothing persisted.
    Unchanged,
    /// New record stored.
    Created,
    /// Tombstone for an ID never seen locally, remembered as such.
    TombstonedUnknown,
    /// An older live version arrived for a tombstoned ID; the tombstone was
    /// kept and pushed back.
    StaleResurrection,
    /// A newer live version revived a tombstoned ID.
    Resurrected,
    /// Semantically empty record; not stored, tombstone pushed back.
    DiscardedEmpty,
    /// Remote version replaced an unmodified local record.
    Updated,
    /// Local and remote diverged and were merged.
    Merged {
        /// Whether the merged value differs from the remote and was saved.
        resaved: bool,
    },
    /// The record is now tombstoned locally.
    Tombstoned,
    /// Two live records shared a uniqueness key; one was tombstoned.
    CollisionTombstoned {
        /// Record left live.
        kept: Uuid,
        /// Record tombstoned and pushed back.
        tombstoned: Uuid,
    },
    /// The incoming record was renamed to a free key.
    Disambiguated {
        /// New uniqueness key.
        key: String,
    },
}

impl ReceiveOutcome {
    /// Returns true if the outcome leaves a live local record.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ReceiveOutcome::Created
                | ReceiveOutcome::Resurrected
                | ReceiveOutcome::Updated
                | ReceiveOutcome::Merged { .. }
                | ReceiveOutcome::Disambiguated { .. }
        )
    }
}

/// Result of one `receive` call.
#[derive(Debug, Clone, Default)]
pub struct ReceiveReport {
    /// One outcome per applied envelope, in processing order.
    pub outcomes: Vec<(Uuid, ReceiveOutcome)>,
    /// Envelopes that could not be applied or pushed back.
    pub failures: Vec<ItemFailure>,
    /// Envelopes acknowledged by the push-back save.
    pub pushed: Vec<Envelope>,
}

impl ReceiveReport {
    /// Outcome for an ID, if it was applied.
    pub fn outcome_for(&self, id: Uuid) -> Option<&ReceiveOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, outcome)| outcome)
    }

    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Merges another report into this one.
    pub fn extend(&mut self, other: ReceiveReport) {
        self.outcomes.extend(other.outcomes);
        self.failures.extend(other.failures);
        self.pushed.extend(other.pushed);
    }
}

/// Result of a delta pull.
#[derive(Debug, Clone)]
pub struct PullReport {
    /// Cursor to pass to the next pull.
    pub cursor: Option<DateTime<Utc>>,
    /// Objects the remote listed as changed.
    pub listed: usize,
    /// Objects actually fetched because their checksum differed.
    pub fetched: usize,
    /// What receiving them did.
    pub report: ReceiveReport,
}

/// Applies remote envelopes of type `T` to the local store.
pub struct ReceiveEngine<T: SyncObject> {
    sync: Arc<SyncEngine<T>>,
    config: ReceiveConfig,
}

impl<T: SyncObject> ReceiveEngine<T> {
    /// Creates a receive engine pushing resolutions through `sync`.
    pub fn new(sync: Arc<SyncEngine<T>>, config: ReceiveConfig) -> Self {
        Self { sync, config }
    }

    /// The outbound engine.
    pub fn sync(&self) -> &Arc<SyncEngine<T>> {
        &self.sync
    }

    /// The configuration.
    pub fn config(&self) -> &ReceiveConfig {
        &self.config
    }

    /// Applies a batch of envelopes.
    ///
    /// Envelopes of another type reject the whole batch. Envelopes that fail
    /// to decode or apply are reported per item; the rest still proceed.
    pub async fn receive(&self, envelopes: Vec<Envelope>) -> SyncResult<ReceiveReport> {
        for envelope in &envelopes {
            check_type::<T>(envelope)?;
        }
        let ctx = self.sync.context();
        let mut report = ReceiveReport::default();

        let mut decoded = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let id = envelope.id();
            match ctx.unseal(&envelope) {
                Ok(object) => decoded.push((envelope, object)),
                Err(error) => {
                    warn!(%id, type_tag = T::TYPE_TAG, %error, "dropping undecodable envelope");
                    report.failures.push(ItemFailure { id, error });
                }
            }
        }
        decoded.sort_by(|(a_env, a), (b_env, b)| {
            (a.uniqueness_key(), a_env.created_at(), a_env.id()).cmp(&(
                b.uniqueness_key(),
                b_env.created_at(),
                b_env.id(),
            ))
        });

        let ids: Vec<Uuid> = decoded.iter().map(|(envelope, _)| envelope.id()).collect();
        let mut pushes = Vec::new();
        {
            let _guards = ctx.locks.lock_many(&ids).await;
            for (envelope, remote) in decoded {
                let id = envelope.id();
                // The envelope for an ID supersedes a resolution queued for it earlier.
                pushes.retain(|pending: &T| pending.id() != id);
                match self.apply(&envelope, remote, &mut pushes) {
                    Ok(outcome) => {
                        debug!(%id, ?outcome, "applied remote envelope");
                        ctx.emit(SyncEvent::Received {
                            id,
                            outcome: outcome.clone(),
                        });
                        report.outcomes.push((id, outcome));
                    }
                    Err(error) => {
                        warn!(%id, %error, "failed to apply remote envelope");
                        report.failures.push(ItemFailure { id, error });
                    }
                }
            }
        }

        if self.config.push_resolutions && !pushes.is_empty() {
            match self.sync.save_all(&pushes).await {
                Ok(acknowledged) => report.pushed = acknowledged,
                Err(SyncError::MultipleErrors(failure)) => {
                    let failure = *failure;
                    report.pushed = failure.accepted;
                    report.failures.extend(failure.failed);
                }
                Err(error) => {
                    for object in &pushes {
                        report.failures.push(ItemFailure {
                            id: object.id(),
                            error: error.clone(),
                        });
                    }
                }
            }
        }

        info!(
            type_tag = T::TYPE_TAG,
            applied = report.outcomes.len(),
            failed = report.failures.len(),
            pushed = report.pushed.len(),
            "receive finished"
        );
        Ok(report)
    }

    /// Delta pull: lists remote checksums received after `since`, fetches
    /// only objects whose checksum differs from the stored one, and
    /// receives them.
    pub async fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullReport> {
        let ctx = self.sync.context();
        let listing = ctx.client.fetch_checksums(T::TYPE_TAG, since).await?;
        let cursor = listing.iter().map(|entry| entry.received_at).max().or(since);

        let ids: Vec<Uuid> = listing.iter().map(|entry| entry.id).collect();
        let stored = ctx.checksums.get_many(&ids)?;
        let wanted: Vec<Uuid> = listing
            .iter()
            .filter(|entry| stored.get(&entry.id) != Some(&entry.checksum))
            .map(|entry| entry.id)
            .collect();

        let config = self.sync.config();
        let pages: Vec<Vec<Uuid>> = wanted
            .chunks(config.max_batch_size)
            .map(<[Uuid]>::to_vec)
            .collect();
        let client = ctx.client.clone();
        let pages: Vec<SyncResult<Vec<Envelope>>> = stream::iter(pages)
            .map(move |page| {
                let client = client.clone();
                async move { client.fetch_many(page).await }
            })
            .buffer_unordered(config.max_concurrent_requests)
            .collect()
            .await;
        let mut envelopes = Vec::with_capacity(wanted.len());
        for page in pages {
            envelopes.extend(page?);
        }
        let fetched = envelopes.len();
        debug!(type_tag = T::TYPE_TAG, listed = listing.len(), fetched, "pulled");

        let report = self.receive(envelopes).await?;
        Ok(PullReport {
            cursor,
            listed: listing.len(),
            fetched,
            report,
        })
    }

    fn apply(&self, envelope: &Envelope, remote: T, pushes: &mut Vec<T>) -> SyncResult<ReceiveOutcome> {
        let ctx = self.sync.context();
        let id = envelope.id();
        let received = envelope.checksum();
        let stored = ctx.checksums.get(id)?;
        let local = ctx.local.load(id)?;
        let local_checksum = local.as_ref().map(|object| ctx.checksum_of(object)).transpose()?;

        if stored == Some(received) || local_checksum == Some(received) {
            if stored != Some(received) {
                ctx.checksums.set(id, received)?;
            }
            return Ok(ReceiveOutcome::Unchanged);
        }

        match local {
            None => self.apply_unknown(envelope, remote, pushes),
            Some(local) => {
                let in_sync = local_checksum == stored;
                self.apply_known(envelope, remote, local, in_sync, pushes)
            }
        }
    }

    fn apply_unknown(
        &self,
        envelope: &Envelope,
        remote: T,
        pushes: &mut Vec<T>,
    ) -> SyncResult<ReceiveOutcome> {
        let ctx = self.sync.context();
        let id = envelope.id();
        let received = envelope.checksum();

        if let Some(deleted_at) = envelope.deleted_at() {
            ctx.local.mark_deleted(id, deleted_at)?;
            ctx.checksums.set(id, received)?;
            return Ok(ReceiveOutcome::TombstonedUnknown);
        }

        let mut outcome = ReceiveOutcome::Created;
        if let Some(deleted_at) = ctx.local.deleted_at(id)? {
            if envelope.updated_at() <= deleted_at {
                ctx.checksums.set(id, received)?;
                pushes.push(remote.tombstoned(deleted_at));
                return Ok(ReceiveOutcome::StaleResurrection);
            }
            outcome = ReceiveOutcome::Resurrected;
        }

        if remote.is_empty() {
            let now = Utc::now();
            ctx.checksums.set(id, received)?;
            ctx.local.mark_deleted(id, now)?;
            pushes.push(remote.tombstoned(now));
            return Ok(ReceiveOutcome::DiscardedEmpty);
        }

        if let Some(existing) = self.find_collision(&remote)? {
            return self.resolve_collision(envelope, remote, existing, pushes);
        }

        ctx.local.persist(&remote)?;
        ctx.checksums.set(id, received)?;
        Ok(outcome)
    }

    fn apply_known(
        &self,
        envelope: &Envelope,
        remote: T,
        local: T,
        in_sync: bool,
        pushes: &mut Vec<T>,
    ) -> SyncResult<ReceiveOutcome> {
        let ctx = self.sync.context();
        let id = envelope.id();
        let received = envelope.checksum();

        if let Some(deleted_at) = local.timestamps().deleted_at {
            if envelope.is_tombstone() {
                ctx.local.persist(&remote)?;
                ctx.checksums.set(id, received)?;
                return Ok(ReceiveOutcome::Tombstoned);
            }
            if envelope.updated_at() <= deleted_at {
                ctx.checksums.set(id, received)?;
                pushes.push(local);
                return Ok(ReceiveOutcome::StaleResurrection);
            }
            if let Some(existing) = self.find_collision(&remote)? {
                return self.resolve_collision(envelope, remote, existing, pushes);
            }
            ctx.local.persist(&remote)?;
            ctx.checksums.set(id, received)?;
            return Ok(ReceiveOutcome::Resurrected);
        }

        if in_sync {
            if envelope.is_tombstone() {
                ctx.local.persist(&remote)?;
                ctx.checksums.set(id, received)?;
                return Ok(ReceiveOutcome::Tombstoned);
            }
            if remote.uniqueness_key() != local.uniqueness_key() {
                if let Some(existing) = self.find_collision(&remote)? {
                    return self.resolve_collision(envelope, remote, existing, pushes);
                }
            }
            ctx.local.persist(&remote)?;
            ctx.checksums.set(id, received)?;
            return Ok(ReceiveOutcome::Updated);
        }

        let merged = ctx.resolver.merge(&local, &remote);
        ctx.local.persist(&merged)?;
        ctx.checksums.set(id, received)?;
        let resaved = ctx.checksum_of(&merged)? != received;
        if resaved {
            pushes.push(merged.clone());
        }
        if merged.is_deleted() {
            Ok(ReceiveOutcome::Tombstoned)
        } else {
            Ok(ReceiveOutcome::Merged { resaved })
        }
    }

    /// Another live local record with the same uniqueness key.
    fn find_collision(&self, remote: &T) -> SyncResult<Option<T>> {
        let Some(key) = remote.uniqueness_key() else {
            return Ok(None);
        };
        Ok(self
            .sync
            .context()
            .local
            .load_by_identity_key(&key)?
            .into_iter()
            .find(|other| other.id() != remote.id() && !other.is_deleted()))
    }

    fn resolve_collision(
        &self,
        envelope: &Envelope,
        remote: T,
        existing: T,
        pushes: &mut Vec<T>,
    ) -> SyncResult<ReceiveOutcome> {
        let ctx = self.sync.context();
        let id = envelope.id();
        debug!(%id, existing = %existing.id(), policy = ?self.config.collision_policy, "identity collision");

        match self.config.collision_policy {
            CollisionPolicy::TombstoneLater => self.keep_one(envelope, remote, existing, pushes),
            CollisionPolicy::Disambiguate => {
                let key = remote.uniqueness_key().unwrap_or_default();
                let free = self.free_key(&key)?;
                let Some(renamed) = remote.with_uniqueness_key(&free) else {
                    warn!(%id, type_tag = T::TYPE_TAG, "type cannot be renamed, tombstoning instead");
                    return self.keep_one(envelope, remote, existing, pushes);
                };
                ctx.local.persist(&renamed)?;
                ctx.checksums.set(id, envelope.checksum())?;
                pushes.push(renamed);
                Ok(ReceiveOutcome::Disambiguated { key: free })
            }
        }
    }

    /// Keeps the canonical record of a colliding pair live and tombstones
    /// the other: a non-empty record beats an empty one, then the earliest
    /// `(created_at, id)` wins, so every device picks the same survivor.
    fn keep_one(
        &self,
        envelope: &Envelope,
        remote: T,
        existing: T,
        pushes: &mut Vec<T>,
    ) -> SyncResult<ReceiveOutcome> {
        let remote_wins = match (existing.is_empty(), remote.is_empty()) {
            (true, false) => true,
            (false, true) => false,
            _ => {
                (remote.timestamps().created_at, remote.id())
                    < (existing.timestamps().created_at, existing.id())
            }
        };
        if !remote_wins {
            return self.tombstone_incoming(envelope, remote, existing.id(), pushes);
        }

        let ctx = self.sync.context();
        let id = envelope.id();
        let loser = existing.tombstoned(Utc::now());
        ctx.local.persist(&loser)?;
        pushes.push(loser);
        ctx.local.persist(&remote)?;
        ctx.checksums.set(id, envelope.checksum())?;
        Ok(ReceiveOutcome::CollisionTombstoned {
            kept: id,
            tombstoned: existing.id(),
        })
    }

    fn tombstone_incoming(
        &self,
        envelope: &Envelope,
        remote: T,
        kept: Uuid,
        pushes: &mut Vec<T>,
    ) -> SyncResult<ReceiveOutcome> {
        let ctx = self.sync.context();
        let id = envelope.id();
        let loser = remote.tombstoned(Utc::now());
        ctx.local.persist(&loser)?;
        ctx.checksums.set(id, envelope.checksum())?;
        pushes.push(loser);
        Ok(ReceiveOutcome::CollisionTombstoned {
            kept,
            tombstoned: id,
        })
    }

    /// First `"key (n)"` with no live record, n starting at 2.
    fn free_key(&self, key: &str) -> SyncResult<String> {
        let local = &self.sync.context().local;
        for n in 2..=self.config.max_disambiguation_attempts {
            let candidate = format!("{key} ({n})");
            let taken = local
                .load_by_identity_key(&candidate)?
                .iter()
                .any(|other| !other.is_deleted());
            if !taken {
                return Ok(candidate);
            }
        }
        Err(SyncError::DisambiguationExhausted {
            key: key.to_string(),
            attempts: self.config.max_disambiguation_attempts,
        })
    }
}

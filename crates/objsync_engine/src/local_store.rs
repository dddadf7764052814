//! Interface to the durable local store of domain records.

use crate::error::SyncResult;
use crate::object::SyncObject;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Local persistence for one record type.
pub trait LocalStore<T>: Send + Sync {
    /// Loads a record, live or tombstoned.
    fn load(&self, id: Uuid) -> SyncResult<Option<T>>;

    /// Loads the records whose uniqueness key equals `key`. Tombstoned
    /// records may be included; callers filter them.
    fn load_by_identity_key(&self, key: &str) -> SyncResult<Vec<T>>;

    /// Inserts or replaces a record.
    fn persist(&self, object: &T) -> SyncResult<()>;

    /// Tombstones a record, or remembers a bare tombstone for an ID with no
    /// local record.
    fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()>;

    /// Deletion time of a record or bare tombstone.
    fn deleted_at(&self, id: Uuid) -> SyncResult<Option<DateTime<Utc>>>;

    /// IDs of every known record and bare tombstone.
    fn ids(&self) -> SyncResult<Vec<Uuid>>;
}

/// In-memory local store.
pub struct MemoryLocalStore<T> {
    records: RwLock<HashMap<Uuid, T>>,
    tombstones: RwLock<HashMap<Uuid, DateTime<Utc>>>,
    writes: AtomicU64,
}

impl<T> MemoryLocalStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of persist and delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of records, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl<T: SyncObject> MemoryLocalStore<T> {
    /// Live records, in no particular order.
    pub fn live(&self) -> Vec<T> {
        self.records
            .read()
            .values()
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect()
    }
}

impl<T> Default for MemoryLocalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncObject> LocalStore<T> for MemoryLocalStore<T> {
    fn load(&self, id: Uuid) -> SyncResult<Option<T>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn load_by_identity_key(&self, key: &str) -> SyncResult<Vec<T>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| !r.is_deleted() && r.uniqueness_key().as_deref() == Some(key))
            .cloned()
            .collect())
    }

    fn persist(&self, object: &T) -> SyncResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !object.is_deleted() {
            self.tombstones.write().remove(&object.id());
        }
        self.records.write().insert(object.id(), object.clone());
        Ok(())
    }

    fn mark_deleted(&self, id: Uuid, at: DateTime<Utc>) -> SyncResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.write();
        match records.get_mut(&id) {
            Some(record) => record.set_deleted_at(Some(at)),
            None => {
                self.tombstones.write().insert(id, at);
            }
        }
        Ok(())
    }

    fn deleted_at(&self, id: Uuid) -> SyncResult<Option<DateTime<Utc>>> {
        if let Some(record) = self.records.read().get(&id) {
            return Ok(record.timestamps().deleted_at);
        }
        Ok(self.tombstones.read().get(&id).copied())
    }

    fn ids(&self) -> SyncResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.records.read().keys().copied().collect();
        ids.extend(self.tombstones.read().keys().copied());
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

//! Per-identity serialization.
//!
//! Two operations on the same object never interleave; operations on
//! different objects never wait for each other.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Guard held while an object is being synced.
pub type IdentityGuard = OwnedMutexGuard<()>;

/// A table of async mutexes keyed by object ID.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    slots: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl IdentityLocks {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.slots
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits for exclusive access to one object.
    pub async fn lock(&self, id: Uuid) -> IdentityGuard {
        self.slot(id).lock_owned().await
    }

    /// Waits for exclusive access to several objects.
    ///
    /// Locks are taken in ID order so concurrent batches cannot deadlock.
    pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<IdentityGuard> {
        let mut sorted = ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Drops slots nobody holds or waits for.
    pub fn prune(&self) {
        self.slots
            .lock()
            .retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    /// Number of slots in the table.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_is_exclusive() {
        let locks = Arc::new(IdentityLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.lock(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = IdentityLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = locks.lock(Uuid::new_v4()).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn lock_many_dedups_and_prunes() {
        let locks = IdentityLocks::new();
        let id = Uuid::new_v4();
        let guards = locks.lock_many(&[id, id, Uuid::new_v4()]).await;
        assert_eq!(guards.len(), 2);

        drop(guards);
        locks.prune();
        assert!(locks.is_empty());
    }
}

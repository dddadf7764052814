//! Conflict resolvers.
//!
//! A resolver combines a local and a remote version of the same object into
//! one. Resolvers must be pure and deterministic: two devices resolving the
//! same pair must reach the same value, or they will keep resending.

use crate::object::{Mergeable, SyncObject};

/// Combines two diverged versions of an object.
pub trait ConflictResolver<T>: Send + Sync {
    /// Returns the value to keep.
    fn merge(&self, local: &T, remote: &T) -> T;
}

impl<T, F> ConflictResolver<T> for F
where
    F: Fn(&T, &T) -> T + Send + Sync,
{
    fn merge(&self, local: &T, remote: &T) -> T {
        self(local, remote)
    }
}

/// Newer `updated_at` wins; ties keep the local version.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<T: SyncObject> ConflictResolver<T> for LastWriteWins {
    fn merge(&self, local: &T, remote: &T) -> T {
        if remote.timestamps().updated_at > local.timestamps().updated_at {
            remote.clone()
        } else {
            local.clone()
        }
    }
}

/// Always keeps the local version.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWins;

impl<T: Clone + Send + Sync> ConflictResolver<T> for LocalWins {
    fn merge(&self, local: &T, _remote: &T) -> T {
        local.clone()
    }
}

/// Always keeps the remote version.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl<T: Clone + Send + Sync> ConflictResolver<T> for RemoteWins {
    fn merge(&self, _local: &T, remote: &T) -> T {
        remote.clone()
    }
}

/// Delegates to the type's [`Mergeable`] impl.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeableResolver;

impl<T: Mergeable + Send + Sync> ConflictResolver<T> for MergeableResolver {
    fn merge(&self, local: &T, remote: &T) -> T {
        local.merge(remote)
    }
}

//! Configuration for the sync and receive engines.

use objsync_protocol::ConflictPolicy;

/// Configuration for outbound saves.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// What to do when a save hits a CAS conflict.
    pub conflict_policy: ConflictPolicy,
    /// How many times a conflicted object is resent before giving up.
    pub max_conflict_resends: u32,
    /// Maximum number of envelopes per batch call.
    pub max_batch_size: usize,
    /// Maximum number of requests in flight for fan-out work.
    pub max_concurrent_requests: usize,
    /// Payloads larger than this are uploaded directly.
    pub direct_upload_threshold: usize,
}

impl SyncConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Replace,
            max_conflict_resends: 1,
            max_batch_size: 1000,
            max_concurrent_requests: 10,
            direct_upload_threshold: 4 * 1024 * 1024,
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the resend bound.
    pub fn with_max_conflict_resends(mut self, resends: u32) -> Self {
        self.max_conflict_resends = resends;
        self
    }

    /// Sets the batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Sets the fan-out limit.
    pub fn with_max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit.max(1);
        self
    }

    /// Sets the direct upload threshold in bytes.
    pub fn with_direct_upload_threshold(mut self, bytes: usize) -> Self {
        self.direct_upload_threshold = bytes;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// How the receive pipeline handles two live records with the same
/// uniqueness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Keep the first-seen record, tombstone the later one.
    #[default]
    TombstoneLater,
    /// Rename the later record to `"Key (n)"`.
    Disambiguate,
}

/// Configuration for the receive pipeline.
#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// Collision handling.
    pub collision_policy: CollisionPolicy,
    /// Highest suffix tried when disambiguating.
    pub max_disambiguation_attempts: u32,
    /// Whether local changes made while receiving are saved back.
    pub push_resolutions: bool,
}

impl ReceiveConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            collision_policy: CollisionPolicy::TombstoneLater,
            max_disambiguation_attempts: 10,
            push_resolutions: true,
        }
    }

    /// Sets the collision policy.
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Sets the highest disambiguation suffix.
    pub fn with_max_disambiguation_attempts(mut self, attempts: u32) -> Self {
        self.max_disambiguation_attempts = attempts;
        self
    }

    /// Disables saving local resolutions back to the remote.
    pub fn without_push(mut self) -> Self {
        self.push_resolutions = false;
        self
    }
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self::new()
    }
}

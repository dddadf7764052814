//! Conflict detection and resolution policies.

use crate::envelope::Envelope;
use crate::error::ProtocolResult;
use objsync_codec::Checksum;
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// What the engine does when the remote rejects a save because its
/// `previous_checksum` is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Resend the local content on top of the remote version.
    #[default]
    Replace,
    /// Merge local and remote with the type's resolver, then resend.
    Merge,
    /// Give up and hand the remote version to the caller.
    FetchRemoteAndError,
}

impl ConflictPolicy {
    /// Returns true if the policy resends after a conflict.
    pub fn resends(&self) -> bool {
        !matches!(self, ConflictPolicy::FetchRemoteAndError)
    }
}

/// A rejected save together with the authoritative remote version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDetails {
    /// The envelope that was rejected.
    pub local: Envelope,
    /// The remote version, absent when the remote has no such object.
    pub remote: Option<Envelope>,
}

impl ConflictDetails {
    /// Creates conflict details.
    pub fn new(local: Envelope, remote: Option<Envelope>) -> Self {
        Self { local, remote }
    }

    /// Object ID.
    pub fn id(&self) -> Uuid {
        self.local.id()
    }

    /// Checksum the remote currently holds.
    pub fn remote_checksum(&self) -> Option<Checksum> {
        self.remote.as_ref().map(Envelope::checksum)
    }

    /// Returns true if the remote has no version of the object.
    pub fn is_remote_missing(&self) -> bool {
        self.remote.is_none()
    }

    /// Returns true if the remote version is a tombstone.
    pub fn is_remote_tombstone(&self) -> bool {
        self.remote.as_ref().is_some_and(Envelope::is_tombstone)
    }

    /// Decodes the remote payload.
    pub fn decode_remote<T: DeserializeOwned>(&self) -> ProtocolResult<Option<T>> {
        self.remote.as_ref().map(Envelope::decode).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Timestamps;
    use objsync_codec::to_canonical_bytes;

    fn envelope(id: Uuid, title: &str) -> Envelope {
        let bytes = to_canonical_bytes(&title.to_string()).unwrap();
        Envelope::seal(id, "note", bytes, Timestamps::now())
    }

    #[test]
    fn default_policy_replaces() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::Replace);
        assert!(ConflictPolicy::Merge.resends());
        assert!(!ConflictPolicy::FetchRemoteAndError.resends());
    }

    #[test]
    fn decode_remote_payload() {
        let id = Uuid::new_v4();
        let details = ConflictDetails::new(envelope(id, "mine"), Some(envelope(id, "theirs")));
        assert_eq!(details.id(), id);
        assert_eq!(
            details.decode_remote::<String>().unwrap(),
            Some("theirs".to_string())
        );
        assert!(!details.is_remote_missing());
    }

    #[test]
    fn missing_remote() {
        let details = ConflictDetails::new(envelope(Uuid::new_v4(), "mine"), None);
        assert!(details.is_remote_missing());
        assert_eq!(details.remote_checksum(), None);
        assert_eq!(details.decode_remote::<String>().unwrap(), None);
    }
}

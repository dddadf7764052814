//! Per-entry results of a save.

use crate::envelope::Envelope;
use objsync_codec::Checksum;
use uuid::Uuid;

/// How the remote answered one envelope of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// The remote stored the envelope.
    Accepted {
        /// Object ID.
        id: Uuid,
        /// Authoritative checksum now held by the remote.
        checksum: Checksum,
    },
    /// `previous_checksum` did not match.
    Conflict {
        /// Object ID.
        id: Uuid,
        /// Remote version, when the remote chose to embed it.
        remote: Option<Envelope>,
    },
}

impl EnvelopeOutcome {
    /// Object ID.
    pub fn id(&self) -> Uuid {
        match self {
            EnvelopeOutcome::Accepted { id, .. } | EnvelopeOutcome::Conflict { id, .. } => *id,
        }
    }

    /// Returns true for an accepted entry.
    pub fn is_accepted(&self) -> bool {
        matches!(self, EnvelopeOutcome::Accepted { .. })
    }
}

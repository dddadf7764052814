//! Progress events.

use crate::receive::ReceiveOutcome;
use objsync_codec::Checksum;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Something observable that happened during sync.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The remote acknowledged an object.
    Saved {
        /// Object ID.
        id: Uuid,
        /// Acknowledged checksum.
        checksum: Checksum,
    },
    /// A save was skipped because the content did not change.
    Unchanged {
        /// Object ID.
        id: Uuid,
    },
    /// The remote rejected a save with a CAS conflict.
    Conflict {
        /// Object ID.
        id: Uuid,
    },
    /// A conflicted object is being resent.
    Resent {
        /// Object ID.
        id: Uuid,
        /// Resend number, starting at 1.
        attempt: u32,
    },
    /// A payload went to blob storage.
    Uploaded {
        /// Object ID.
        id: Uuid,
        /// Payload size.
        bytes: usize,
    },
    /// An object could not be synced.
    Failed {
        /// Object ID.
        id: Uuid,
        /// Error description.
        message: String,
    },
    /// A received envelope was applied.
    Received {
        /// Object ID.
        id: Uuid,
        /// What happened locally.
        outcome: ReceiveOutcome,
    },
    /// Batch progress.
    Progress {
        /// Entries settled so far.
        done: usize,
        /// Entries in the batch.
        total: usize,
    },
}

/// Lossy event publisher backed by a bounded channel.
///
/// Publishing never blocks; events that do not fit are dropped and counted.
#[derive(Debug, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<SyncEvent>>,
    dropped: AtomicU64,
}

impl EventSink {
    /// Creates a sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let sink = Self {
            sender: Some(sender),
            dropped: AtomicU64::new(0),
        };
        (sink, receiver)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Publishes an event.
    pub fn emit(&self, event: SyncEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_and_counts() {
        let (sink, mut rx) = EventSink::channel(1);
        let id = Uuid::new_v4();
        sink.emit(SyncEvent::Conflict { id });
        sink.emit(SyncEvent::Unchanged { id });

        assert_eq!(sink.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::Conflict { id });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disabled_sink_is_silent() {
        let sink = EventSink::disabled();
        sink.emit(SyncEvent::Progress { done: 1, total: 2 });
        assert_eq!(sink.dropped(), 0);
    }
}

//! Dispatch of mixed-type batches to typed receive engines.

use crate::error::{ItemFailure, SyncResult};
use crate::object::SyncObject;
use crate::receive::{PullReport, ReceiveEngine, ReceiveReport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use objsync_protocol::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A receive engine with its object type erased.
#[async_trait]
pub trait TypedReceiver: Send + Sync {
    /// Type tag this receiver accepts.
    fn type_tag(&self) -> &'static str;

    /// Applies envelopes of this receiver's type.
    async fn receive(&self, envelopes: Vec<Envelope>) -> SyncResult<ReceiveReport>;

    /// Delta pull for this receiver's type.
    async fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullReport>;
}

#[async_trait]
impl<T: SyncObject> TypedReceiver for ReceiveEngine<T> {
    fn type_tag(&self) -> &'static str {
        T::TYPE_TAG
    }

    async fn receive(&self, envelopes: Vec<Envelope>) -> SyncResult<ReceiveReport> {
        ReceiveEngine::receive(self, envelopes).await
    }

    async fn pull(&self, since: Option<DateTime<Utc>>) -> SyncResult<PullReport> {
        ReceiveEngine::pull(self, since).await
    }
}

/// Outcome of routing one mixed batch.
#[derive(Debug, Clone, Default)]
pub struct RoutedReport {
    /// Aggregated reports of every receiver that ran.
    pub report: ReceiveReport,
    /// Envelopes skipped because no receiver handles their type.
    pub skipped: Vec<Envelope>,
}

/// Routes envelopes to the receiver registered for their type.
#[derive(Default, Clone)]
pub struct ReceiveRouter {
    receivers: HashMap<&'static str, Arc<dyn TypedReceiver>>,
}

impl ReceiveRouter {
    /// Creates a router with no receivers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a receiver, replacing any previous one for its type.
    pub fn register(&mut self, receiver: Arc<dyn TypedReceiver>) {
        self.receivers.insert(receiver.type_tag(), receiver);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_receiver(mut self, receiver: Arc<dyn TypedReceiver>) -> Self {
        self.register(receiver);
        self
    }

    /// Registered type tags, sorted.
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.receivers.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Splits `envelopes` by type and runs every receiver concurrently.
    ///
    /// Per-item failures are aggregated. A receiver that rejects its whole
    /// group records one failure per envelope of that group; the reports of
    /// the other receivers are kept.
    pub async fn receive(&self, envelopes: Vec<Envelope>) -> SyncResult<RoutedReport> {
        let mut groups: HashMap<&'static str, Vec<Envelope>> = HashMap::new();
        let mut routed = RoutedReport::default();
        for envelope in envelopes {
            match self.receivers.get_key_value(envelope.type_tag()) {
                Some((tag, _)) => groups.entry(*tag).or_default().push(envelope),
                None => {
                    warn!(id = %envelope.id(), type_tag = envelope.type_tag(), "no receiver for type, skipping");
                    routed.skipped.push(envelope);
                }
            }
        }

        let runs = groups.into_iter().filter_map(|(tag, group)| {
            let receiver = self.receivers.get(tag)?.clone();
            let ids: Vec<Uuid> = group.iter().map(Envelope::id).collect();
            Some(async move { (tag, ids, receiver.receive(group).await) })
        });
        for (tag, ids, result) in join_all(runs).await {
            match result {
                Ok(report) => routed.report.extend(report),
                Err(error) => {
                    warn!(type_tag = tag, count = ids.len(), %error, "receiver rejected its batch");
                    routed.report.failures.extend(ids.into_iter().map(|id| ItemFailure {
                        id,
                        error: error.clone(),
                    }));
                }
            }
        }

        info!(
            applied = routed.report.outcomes.len(),
            failed = routed.report.failures.len(),
            skipped = routed.skipped.len(),
            "routed receive finished"
        );
        Ok(routed)
    }

    /// Pulls every registered type from the same cursor.
    ///
    /// Returns one report per type tag.
    pub async fn pull_all(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<(&'static str, PullReport)>> {
        let runs = self.receivers.iter().map(|(tag, receiver)| async move {
            receiver.pull(since).await.map(|report| (*tag, report))
        });
        let mut reports = join_all(runs)
            .await
            .into_iter()
            .collect::<SyncResult<Vec<_>>>()?;
        reports.sort_by_key(|(tag, _)| *tag);
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum_store::MemoryChecksumStore;
    use crate::client::MockClient;
    use crate::config::{ReceiveConfig, SyncConfig};
    use crate::context::SyncContext;
    use crate::engine::SyncEngine;
    use crate::local_store::MemoryLocalStore;
    use crate::object::seal;
    use crate::receive::ReceiveOutcome;
    use crate::test_support::Doc;
    use bytes::Bytes;
    use crate::error::SyncError;
    use objsync_protocol::Timestamps;

    fn doc_receiver(client: Arc<MockClient>) -> Arc<ReceiveEngine<Doc>> {
        let ctx = SyncContext::new(
            client,
            Arc::new(MemoryChecksumStore::new()),
            Arc::new(MemoryLocalStore::<Doc>::new()),
        );
        let sync = Arc::new(SyncEngine::new(ctx, SyncConfig::default()));
        Arc::new(ReceiveEngine::new(sync, ReceiveConfig::default()))
    }

    #[tokio::test]
    async fn unknown_types_are_skipped() {
        let client = Arc::new(MockClient::new());
        let router = ReceiveRouter::new().with_receiver(doc_receiver(client));
        assert_eq!(router.type_tags(), vec!["doc"]);

        let doc = Doc::new("Doc 1");
        let foreign = Envelope::seal(Uuid::new_v4(), "link", Bytes::from_static(b"\xa0"), Timestamps::now());

        let routed = router
            .receive(vec![seal(&doc).unwrap(), foreign.clone()])
            .await
            .unwrap();
        assert_eq!(routed.report.outcome_for(doc.id), Some(&ReceiveOutcome::Created));
        assert_eq!(routed.skipped.len(), 1);
        assert_eq!(routed.skipped[0].id(), foreign.id());
    }

    /// Rejects every batch it is given.
    struct Offline;

    #[async_trait]
    impl TypedReceiver for Offline {
        fn type_tag(&self) -> &'static str {
            "link"
        }

        async fn receive(&self, _envelopes: Vec<Envelope>) -> SyncResult<ReceiveReport> {
            Err(SyncError::local_store("disk full"))
        }

        async fn pull(&self, _since: Option<DateTime<Utc>>) -> SyncResult<PullReport> {
            Err(SyncError::local_store("disk full"))
        }
    }

    #[tokio::test]
    async fn rejected_group_keeps_other_reports() {
        let client = Arc::new(MockClient::new());
        let router = ReceiveRouter::new()
            .with_receiver(doc_receiver(client))
            .with_receiver(Arc::new(Offline));

        let doc = Doc::new("Doc 1");
        let link = Envelope::seal(Uuid::new_v4(), "link", Bytes::from_static(b"\xa0"), Timestamps::now());

        let routed = router
            .receive(vec![seal(&doc).unwrap(), link.clone()])
            .await
            .unwrap();
        assert_eq!(routed.report.outcome_for(doc.id), Some(&ReceiveOutcome::Created));
        assert_eq!(routed.report.failures.len(), 1);
        assert_eq!(routed.report.failures[0].id, link.id());
        assert!(matches!(routed.report.failures[0].error, SyncError::LocalStore(_)));
        assert!(routed.skipped.is_empty());
    }

    #[tokio::test]
    async fn pull_all_reports_per_type() {
        let client = Arc::new(MockClient::new());
        let router = ReceiveRouter::new().with_receiver(doc_receiver(client.clone()));
        let doc = Doc::new("Doc 1");
        client.put_remote(seal(&doc).unwrap());

        let reports = router.pull_all(None).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "doc");
        assert_eq!(reports[0].1.fetched, 1);
    }
}

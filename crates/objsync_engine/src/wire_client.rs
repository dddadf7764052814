//! CBOR request/response client over a pluggable byte transport.
//!
//! The actual transport is abstracted via [`WireTransport`], so HTTP,
//! WebSocket or in-process loopback implementations can all drive the
//! same [`WireClient`].

use crate::client::SyncClient;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use objsync_protocol::wire::{BatchSaveRequest, ChecksumEntry, EnvelopeRecord, Request, Response};
use objsync_protocol::{Envelope, EnvelopeOutcome, UploadSlot};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// Moves encoded requests to the remote and returns encoded responses.
#[async_trait]
pub trait WireTransport: Send + Sync {
    /// Sends one request body and returns the response body.
    async fn post(&self, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// A [`SyncClient`] speaking the CBOR wire protocol.
pub struct WireClient<W: WireTransport> {
    transport: W,
    requests: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl<W: WireTransport> WireClient<W> {
    /// Creates a client over `transport`.
    pub fn new(transport: W) -> Self {
        Self {
            transport,
            requests: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &W {
        &self.transport
    }

    /// Requests sent so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Last transport or remote error.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn call(&self, request: Request) -> SyncResult<Response> {
        let body = request.encode()?;
        self.requests.fetch_add(1, Ordering::SeqCst);

        let reply = self.transport.post(body).await.map_err(|message| {
            warn!(%message, "transport failed");
            *self.last_error.write() = Some(message.clone());
            SyncError::transport_retryable(message)
        })?;
        let response = Response::decode(&reply)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")))?;

        if let Response::Error { message, retryable } = response {
            debug!(%message, retryable, "remote returned an error");
            *self.last_error.write() = Some(message.clone());
            return Err(SyncError::Transport { message, retryable });
        }
        *self.last_error.write() = None;
        Ok(response)
    }
}

fn unexpected(expected: &str, response: &Response) -> SyncError {
    SyncError::Protocol(format!("expected {expected}, got {response:?}"))
}

fn into_envelopes(records: Vec<EnvelopeRecord>) -> SyncResult<Vec<Envelope>> {
    records
        .into_iter()
        .map(|record| Envelope::try_from(record).map_err(SyncError::from))
        .collect()
}

#[async_trait]
impl<W: WireTransport> SyncClient for WireClient<W> {
    async fn save(&self, envelope: Envelope) -> SyncResult<EnvelopeOutcome> {
        match self.call(Request::Save(EnvelopeRecord::from(&envelope))).await? {
            Response::Saved(outcome) => Ok(EnvelopeOutcome::try_from(outcome)?),
            other => Err(unexpected("Saved", &other)),
        }
    }

    async fn save_batch(&self, envelopes: Vec<Envelope>) -> SyncResult<Vec<EnvelopeOutcome>> {
        let request = Request::SaveBatch(BatchSaveRequest::from_envelopes(&envelopes));
        match self.call(request).await? {
            Response::SavedBatch(response) => Ok(response.into_outcomes()?),
            other => Err(unexpected("SavedBatch", &other)),
        }
    }

    async fn fetch(&self, id: Uuid) -> SyncResult<Option<Envelope>> {
        Ok(self.fetch_many(vec![id]).await?.into_iter().next())
    }

    async fn fetch_many(&self, ids: Vec<Uuid>) -> SyncResult<Vec<Envelope>> {
        match self.call(Request::Fetch { ids }).await? {
            Response::Records(records) => into_envelopes(records),
            other => Err(unexpected("Records", &other)),
        }
    }

    async fn fetch_checksums(
        &self,
        type_tag: &str,
        since: Option<DateTime<Utc>>,
    ) -> SyncResult<Vec<ChecksumEntry>> {
        let request = Request::FetchChecksums {
            type_tag: type_tag.to_string(),
            since,
        };
        match self.call(request).await? {
            Response::Checksums(entries) => Ok(entries),
            other => Err(unexpected("Checksums", &other)),
        }
    }

    async fn prepare_upload(&self, id: Uuid, size: u64) -> SyncResult<UploadSlot> {
        match self.call(Request::PrepareUpload { id, size }).await? {
            Response::Upload(slot) => Ok(slot),
            other => Err(unexpected("Upload", &other)),
        }
    }

    async fn put_blob(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        bytes: Bytes,
    ) -> SyncResult<()> {
        let request = Request::PutBlob {
            url: url.to_string(),
            headers: headers.clone(),
            data: bytes.to_vec(),
        };
        match self.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected("Done", &other)),
        }
    }

    async fn delete(&self, id: Uuid) -> SyncResult<()> {
        match self.call(Request::Delete { id }).await? {
            Response::Done => Ok(()),
            other => Err(unexpected("Done", &other)),
        }
    }

    async fn delete_all(&self, type_tag: Option<&str>) -> SyncResult<()> {
        let request = Request::DeleteAll {
            type_tag: type_tag.map(str::to_string),
        };
        match self.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected("Done", &other)),
        }
    }
}

//! Request handling for the CBOR wire protocol.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::RemoteStore;
use crate::uploads::UploadSigner;
use bytes::Bytes;
use objsync_protocol::wire::{BatchSaveResponse, EnvelopeRecord, OutcomeRecord, Request, Response};
use objsync_protocol::Envelope;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Object storage (shared across all handlers).
    pub store: Arc<RemoteStore>,
    /// Upload slot signer.
    pub uploads: UploadSigner,
}

impl HandlerContext {
    /// Creates a handler context.
    pub fn new(config: ServerConfig, store: Arc<RemoteStore>) -> Self {
        let uploads = UploadSigner::new(
            config.upload_secret.clone(),
            config.upload_base_url.clone(),
            config.upload_expiry,
        );
        Self {
            config,
            store,
            uploads,
        }
    }
}

/// Handler for wire requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one decoded request.
    pub fn handle(&self, request: Request) -> ServerResult<Response> {
        let store = &self.context.store;
        match request {
            Request::Save(record) => {
                let outcome = store.save(Envelope::try_from(record)?)?;
                Ok(Response::Saved(OutcomeRecord::from(&outcome)))
            }
            Request::SaveBatch(batch) => {
                let max = self.context.config.max_batch_size;
                if batch.records.len() > max {
                    return Err(ServerError::BatchTooLarge {
                        size: batch.records.len(),
                        max,
                    });
                }
                let envelopes = batch
                    .records
                    .into_iter()
                    .map(Envelope::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                let outcomes = store.save_batch(envelopes)?;
                let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
                info!(size = outcomes.len(), accepted, "batch saved");
                Ok(Response::SavedBatch(BatchSaveResponse {
                    results: outcomes.iter().map(OutcomeRecord::from).collect(),
                }))
            }
            Request::Fetch { ids } => {
                if ids.len() > self.context.config.max_fetch {
                    return Err(ServerError::BatchTooLarge {
                        size: ids.len(),
                        max: self.context.config.max_fetch,
                    });
                }
                let records = store
                    .fetch_many(&ids)
                    .iter()
                    .map(EnvelopeRecord::from)
                    .collect();
                Ok(Response::Records(records))
            }
            Request::FetchChecksums { type_tag, since } => {
                Ok(Response::Checksums(store.checksums_since(&type_tag, since)))
            }
            Request::PrepareUpload { id, size } => {
                Ok(Response::Upload(self.context.uploads.issue(id, size)?))
            }
            Request::PutBlob { url, headers, data } => {
                let target = self.context.uploads.validate(&url, &headers)?;
                if data.len() as u64 > target.size {
                    return Err(ServerError::BlobTooLarge {
                        size: data.len(),
                        max: target.size,
                    });
                }
                debug!(blob_ref = %target.blob_ref, bytes = data.len(), "blob uploaded");
                store.put_blob(target.blob_ref, Bytes::from(data));
                Ok(Response::Done)
            }
            Request::Delete { id } => {
                store.delete(id);
                Ok(Response::Done)
            }
            Request::DeleteAll { type_tag } => {
                let removed = store.delete_all(type_tag.as_deref());
                info!(type_tag = ?type_tag, removed, "deleted objects");
                Ok(Response::Done)
            }
        }
    }

    /// Decodes a request, handles it and encodes the response.
    ///
    /// Failures become [`Response::Error`]; only server-side failures are
    /// marked retryable.
    pub fn handle_bytes(&self, body: &[u8]) -> Vec<u8> {
        let response = match Request::decode(body) {
            Ok(request) => self.handle(request).unwrap_or_else(|err| {
                warn!(error = %err, "request failed");
                Response::error(err.to_string(), err.is_server_error())
            }),
            Err(err) => Response::error(format!("undecodable request: {err}"), false),
        };
        match response.encode() {
            Ok(bytes) => bytes,
            Err(err) => Response::error(format!("unencodable response: {err}"), true)
                .encode()
                .unwrap_or_default(),
        }
    }
}

//! The reference remote.

use crate::config::ServerConfig;
use crate::handler::{HandlerContext, RequestHandler};
use crate::store::RemoteStore;
use objsync_protocol::wire::{Request, Response};
use objsync_protocol::Envelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The reference remote store.
///
/// Serves the CBOR wire protocol from memory with CAS saves, signed direct
/// uploads and delta checksum listings.
///
/// # Example
///
/// ```
/// use objsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
///
/// // A transport would forward request bodies to `handle_bytes`
/// // and send the returned bytes back to the client.
/// assert_eq!(server.object_count(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    requests: AtomicU64,
}

impl SyncServer {
    /// Creates a server with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(RemoteStore::new(config.embed_remote_on_conflict));
        Self::with_store(config, store)
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<RemoteStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            requests: AtomicU64::new(0),
        }
    }

    /// Handles one decoded request; failures become error responses.
    pub fn handle(&self, request: Request) -> Response {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.handler
            .handle(request)
            .unwrap_or_else(|err| Response::error(err.to_string(), err.is_server_error()))
    }

    /// Handles one encoded request and returns the encoded response.
    pub fn handle_bytes(&self, body: &[u8]) -> Vec<u8> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.handler.handle_bytes(body)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<RemoteStore> {
        &self.context.store
    }

    /// Current version of an object.
    pub fn object(&self, id: Uuid) -> Option<Envelope> {
        self.context.store.get(id)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.context.store.len()
    }

    /// Requests handled so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

//! Multi-device harness over an in-process server.
//!
//! Each [`Device`] has its own local store, checksum store and engines, and
//! talks to a shared [`SyncServer`] through the CBOR wire protocol.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use objsync_engine::{
    ChecksumStore, Envelope, FileChecksumStore, LocalStore, MemoryChecksumStore,
    MemoryLocalStore, PullReport, ReceiveConfig, ReceiveEngine, SyncConfig, SyncContext,
    SyncEngine, SyncObject, SyncResult, WireClient, WireTransport,
};
use objsync_protocol::wire::Request;
use objsync_server::SyncServer;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// One request seen by a [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Request kind, e.g. `"save_batch"`.
    pub kind: &'static str,
    /// Records or IDs carried.
    pub size: usize,
}

/// Routes encoded requests straight into a server.
///
/// Records every call and can be told to fail the next ones.
pub struct LoopbackTransport {
    server: Arc<SyncServer>,
    failures: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<Call>>,
}

impl LoopbackTransport {
    /// Creates a transport connected to `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes the next request fail before reaching the server.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push_back(message.into());
    }

    /// Every request sent so far, failed ones included.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Sizes of batch saves, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls_of("save_batch")
    }

    /// Sizes of every call of one kind.
    pub fn calls_of(&self, kind: &str) -> Vec<usize> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.kind == kind)
            .map(|call| call.size)
            .collect()
    }

    /// Forgets recorded calls.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

fn describe(request: &Request) -> Call {
    let (kind, size) = match request {
        Request::Save(_) => ("save", 1),
        Request::SaveBatch(batch) => ("save_batch", batch.records.len()),
        Request::Fetch { ids } => ("fetch", ids.len()),
        Request::FetchChecksums { .. } => ("fetch_checksums", 0),
        Request::PrepareUpload { .. } => ("prepare_upload", 1),
        Request::PutBlob { data, .. } => ("put_blob", data.len()),
        Request::Delete { .. } => ("delete", 1),
        Request::DeleteAll { .. } => ("delete_all", 0),
    };
    Call { kind, size }
}

#[async_trait]
impl WireTransport for LoopbackTransport {
    async fn post(&self, body: Vec<u8>) -> Result<Vec<u8>, String> {
        if let Ok(request) = Request::decode(&body) {
            self.calls.lock().push(describe(&request));
        }
        if let Some(message) = self.failures.lock().pop_front() {
            return Err(message);
        }
        Ok(self.server.handle_bytes(&body))
    }
}

/// Options for building a [`Device`].
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    /// Outbound configuration.
    pub sync: SyncConfig,
    /// Inbound configuration.
    pub receive: ReceiveConfig,
    /// Persist checksums to this file instead of memory.
    pub checksum_path: Option<PathBuf>,
}

impl DeviceOptions {
    /// Sets the outbound configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the inbound configuration.
    pub fn with_receive(mut self, receive: ReceiveConfig) -> Self {
        self.receive = receive;
        self
    }

    /// Persists checksums to `path`.
    pub fn with_checksum_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checksum_path = Some(path.into());
        self
    }
}

/// A client device syncing objects of type `T`.
pub struct Device<T: SyncObject> {
    /// Wire client shared by both engines.
    pub client: Arc<WireClient<LoopbackTransport>>,
    /// Checksum bookkeeping.
    pub checksums: Arc<dyn ChecksumStore>,
    /// Local records.
    pub local: Arc<MemoryLocalStore<T>>,
    /// Outbound engine.
    pub sync: Arc<SyncEngine<T>>,
    /// Inbound engine.
    pub receiver: ReceiveEngine<T>,
    cursor: Mutex<Option<DateTime<Utc>>>,
}

impl<T: SyncObject> Device<T> {
    /// Creates a device with default options.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self::build(server, DeviceOptions::default(), |ctx| ctx)
    }

    /// Creates a device; `customize` may set a resolver, events or locks.
    ///
    /// # Panics
    ///
    /// Panics if the checksum file cannot be opened.
    pub fn build(
        server: Arc<SyncServer>,
        options: DeviceOptions,
        customize: impl FnOnce(SyncContext<T>) -> SyncContext<T>,
    ) -> Self {
        let client = Arc::new(WireClient::new(LoopbackTransport::new(server)));
        let checksums: Arc<dyn ChecksumStore> = match &options.checksum_path {
            Some(path) => {
                Arc::new(FileChecksumStore::open(path).expect("Failed to open checksum store"))
            }
            None => Arc::new(MemoryChecksumStore::new()),
        };
        let local = Arc::new(MemoryLocalStore::new());
        let ctx = customize(SyncContext::new(
            client.clone(),
            checksums.clone(),
            local.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(ctx, options.sync));
        let receiver = ReceiveEngine::new(sync.clone(), options.receive);
        Self {
            client,
            checksums,
            local,
            sync,
            receiver,
            cursor: Mutex::new(None),
        }
    }

    /// The loopback transport.
    pub fn transport(&self) -> &LoopbackTransport {
        self.client.transport()
    }

    /// Persists `object` locally and saves it.
    pub async fn edit(&self, object: &T) -> SyncResult<Envelope> {
        self.local.persist(object)?;
        self.sync.save(object).await
    }

    /// Pulls everything received since the last pull and advances the
    /// cursor.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        let since = *self.cursor.lock();
        let report = self.receiver.pull(since).await?;
        *self.cursor.lock() = report.cursor;
        Ok(report)
    }
}

/// A temporary directory holding a checksum file path for
/// [`DeviceOptions::with_checksum_path`]; the file is removed with the
/// directory.
///
/// # Panics
///
/// Panics if the directory cannot be created.
pub fn temp_checksum_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("checksums.cbor");
    (dir, path)
}

/// A fresh server with default configuration.
pub fn server() -> Arc<SyncServer> {
    Arc::new(SyncServer::default())
}

/// Installs a test subscriber honoring `RUST_LOG`; repeated calls are
/// ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

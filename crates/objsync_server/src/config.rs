//! Server configuration.

use std::time::Duration;

/// Configuration for the reference remote.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum records per batch save.
    pub max_batch_size: usize,
    /// Maximum IDs per fetch.
    pub max_fetch: usize,
    /// Whether conflicts embed the current remote version.
    pub embed_remote_on_conflict: bool,
    /// Base of issued upload URLs.
    pub upload_base_url: String,
    /// How long an upload slot stays valid.
    pub upload_expiry: Duration,
    /// Secret key for signing upload URLs.
    pub upload_secret: Vec<u8>,
}

impl ServerConfig {
    /// Creates a configuration signing uploads with `upload_secret`.
    pub fn new(upload_secret: Vec<u8>) -> Self {
        Self {
            max_batch_size: 1000,
            max_fetch: 1000,
            embed_remote_on_conflict: true,
            upload_base_url: "objsync://uploads".into(),
            upload_expiry: Duration::from_secs(15 * 60),
            upload_secret,
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Sets the maximum number of IDs per fetch.
    pub fn with_max_fetch(mut self, size: usize) -> Self {
        self.max_fetch = size.max(1);
        self
    }

    /// Makes conflicts carry no remote version, forcing clients to fetch.
    pub fn without_embedded_remote(mut self) -> Self {
        self.embed_remote_on_conflict = false;
        self
    }

    /// Sets the base of upload URLs.
    pub fn with_upload_base_url(mut self, url: impl Into<String>) -> Self {
        self.upload_base_url = url.into();
        self
    }

    /// Sets the upload slot lifetime.
    pub fn with_upload_expiry(mut self, expiry: Duration) -> Self {
        self.upload_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(b"objsync-development-upload-secret".to_vec())
    }
}

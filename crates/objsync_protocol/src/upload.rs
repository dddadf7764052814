//! Direct upload slots for large payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A pre-authorized location the client PUTs a large payload to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSlot {
    /// Object the upload belongs to.
    pub id: Uuid,
    /// Signed upload URL.
    pub upload_url: String,
    /// Headers that must accompany the upload.
    pub headers: BTreeMap<String, String>,
    /// Reference to put in the envelope once the upload succeeded.
    pub blob_ref: String,
}

impl UploadSlot {
    /// Creates a slot without extra headers.
    pub fn new(id: Uuid, upload_url: impl Into<String>, blob_ref: impl Into<String>) -> Self {
        Self {
            id,
            upload_url: upload_url.into(),
            headers: BTreeMap::new(),
            blob_ref: blob_ref.into(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

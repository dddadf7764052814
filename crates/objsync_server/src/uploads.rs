//! Signed direct-upload slots.
//!
//! Upload URLs carry an HMAC-SHA256 signature over the blob reference, the
//! reserved size and an expiry, so only slots issued by this server accept
//! bytes.
//!
//! ## URL format
//!
//! `{base}/{blob_ref}?size={bytes}&expires={unix_millis}&sig={hex}`

use crate::error::{ServerError, ServerResult};
use chrono::Utc;
use hmac::{Hmac, Mac};
use objsync_protocol::UploadSlot;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header naming the content type of an upload.
pub const CONTENT_TYPE_HEADER: &str = "content-type";
/// Content type required for blob uploads.
pub const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

/// A validated upload target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Blob reference the bytes are stored under.
    pub blob_ref: String,
    /// Maximum accepted size.
    pub size: u64,
}

/// Issues and validates upload slots.
#[derive(Clone)]
pub struct UploadSigner {
    secret: Vec<u8>,
    base_url: String,
    expiry: Duration,
}

impl UploadSigner {
    /// Creates a signer.
    pub fn new(secret: Vec<u8>, base_url: impl Into<String>, expiry: Duration) -> Self {
        Self {
            secret,
            base_url: base_url.into(),
            expiry,
        }
    }

    /// Reserves a slot for `size` bytes of object `id`.
    pub fn issue(&self, id: Uuid, size: u64) -> ServerResult<UploadSlot> {
        let blob_ref = format!("blob-{id}-{}", Uuid::new_v4().simple());
        let expires = Utc::now().timestamp_millis()
            + i64::try_from(self.expiry.as_millis()).unwrap_or(i64::MAX / 2);
        let signature = hex::encode(self.sign(&blob_ref, size, expires)?);
        let url = format!(
            "{}/{blob_ref}?size={size}&expires={expires}&sig={signature}",
            self.base_url
        );
        Ok(UploadSlot::new(id, url, blob_ref).with_header(CONTENT_TYPE_HEADER, BLOB_CONTENT_TYPE))
    }

    /// Validates an upload URL and its headers.
    pub fn validate(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> ServerResult<UploadTarget> {
        let rest = url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| ServerError::NotAuthorized("foreign upload url".into()))?;
        let (blob_ref, query) = rest
            .split_once('?')
            .ok_or_else(|| ServerError::NotAuthorized("unsigned upload url".into()))?;

        let mut size = None;
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("size", value)) => size = value.parse::<u64>().ok(),
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                Some(("sig", value)) => signature = hex::decode(value).ok(),
                _ => {}
            }
        }
        let (Some(size), Some(expires), Some(signature)) = (size, expires, signature) else {
            return Err(ServerError::NotAuthorized("malformed upload url".into()));
        };

        let mut mac = self.mac()?;
        mac.update(signed_message(blob_ref, size, expires).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        if Utc::now().timestamp_millis() > expires {
            return Err(ServerError::NotAuthorized("upload slot expired".into()));
        }
        if headers.get(CONTENT_TYPE_HEADER).map(String::as_str) != Some(BLOB_CONTENT_TYPE) {
            return Err(ServerError::NotAuthorized("missing content type".into()));
        }

        Ok(UploadTarget {
            blob_ref: blob_ref.to_string(),
            size,
        })
    }

    fn sign(&self, blob_ref: &str, size: u64, expires: i64) -> ServerResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(signed_message(blob_ref, size, expires).as_bytes());
        Ok(mac.finalize().into_bytes().into())
    }

    fn mac(&self) -> ServerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|e| ServerError::Internal(e.to_string()))
    }
}

fn signed_message(blob_ref: &str, size: u64, expires: i64) -> String {
    format!("{blob_ref}\n{size}\n{expires}")
}

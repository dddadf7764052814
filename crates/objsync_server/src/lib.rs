//! # objsync server
//!
//! In-process reference remote for objsync.
//!
//! This crate provides:
//! - A CAS object store (`previous_checksum` must match the current version)
//! - Signed direct-upload slots (HMAC-SHA256)
//! - Delta checksum listings keyed by reception time
//! - A CBOR request handler for the wire protocol
//!
//! # Protocol
//!
//! 1. Clients save envelopes carrying the checksum they last saw
//! 2. The store accepts the save only if that checksum is still current
//! 3. Conflicts carry the current version unless embedding is disabled
//! 4. Large payloads are uploaded to a signed slot first and saved by
//!    reference; the store inlines them on acceptance

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;
mod uploads;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use store::RemoteStore;
pub use uploads::{UploadSigner, UploadTarget, BLOB_CONTENT_TYPE, CONTENT_TYPE_HEADER};

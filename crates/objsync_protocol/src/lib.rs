//! # objsync protocol
//!
//! Protocol types shared by the sync engine and the remote store.
//!
//! This crate provides:
//! - [`Envelope`], the checksummed unit of transfer
//! - [`EnvelopeOutcome`] and [`ConflictDetails`] for CAS results
//! - [`ConflictPolicy`] selecting what happens after a conflict
//! - [`UploadSlot`] for direct uploads of large payloads
//! - CBOR wire records in [`wire`]
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod envelope;
mod error;
mod outcome;
mod upload;
pub mod wire;

pub use conflict::{ConflictDetails, ConflictPolicy};
pub use envelope::{Envelope, Timestamps};
pub use error::{ProtocolError, ProtocolResult};
pub use outcome::EnvelopeOutcome;
pub use upload::UploadSlot;

pub use objsync_codec::Checksum;

//! # objsync testkit
//!
//! Test utilities for objsync.
//!
//! This crate provides:
//! - Sample domain types ([`Note`], [`Link`]) and a field-level resolver
//! - A multi-device [`Device`] harness over an in-process server
//! - A [`LoopbackTransport`] recording calls and injecting failures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use objsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn two_devices() {
//!     let server = server();
//!     let phone: Device<Note> = Device::new(server.clone());
//!     let laptop: Device<Note> = Device::new(server);
//!
//!     phone.edit(&Note::new("Groceries")).await.unwrap();
//!     laptop.pull().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;

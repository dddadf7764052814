//! # objsync engine
//!
//! Checksum-based object sync between a local store and a remote object store.
//!
//! This crate provides:
//! - [`SyncEngine`] for single and batch saves with CAS conflict handling
//! - [`ReceiveEngine`] and [`ReceiveRouter`] for applying remote changes
//! - Pluggable [`SyncClient`], [`ChecksumStore`] and [`LocalStore`] seams
//! - Conflict resolvers and identity collision policies
//! - Optional client-side payload encryption behind a [`PayloadCipher`]
//! - Progress events and a latest-value [`sample`] throttle
//! - A CBOR [`WireClient`] over any [`WireTransport`]
//!
//! ## Architecture
//!
//! Every save carries the checksum the client last saw as a compare-and-swap
//! precondition. The remote accepts the save only if that checksum still
//! matches its current version; otherwise it reports a conflict, and the
//! engine resolves and resends according to its [`ConflictPolicy`].
//!
//! ## Key Invariants
//!
//! - The stored checksum changes only when the remote acknowledged a version
//! - Identical content is never resent unless forced
//! - Saves and receives of one object ID never interleave
//! - At most one live record per uniqueness key survives a receive
//!
//! [`ConflictPolicy`]: objsync_protocol::ConflictPolicy

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checksum_store;
mod cipher;
mod client;
mod config;
mod context;
mod engine;
mod error;
mod events;
mod local_store;
mod locks;
mod object;
mod receive;
mod resolver;
mod router;
mod throttle;
mod wire_client;

#[cfg(test)]
mod test_support;

pub use checksum_store::{ChecksumStore, FileChecksumStore, MemoryChecksumStore};
pub use cipher::{PayloadCipher, Plaintext};
#[cfg(feature = "encryption")]
pub use cipher::{Aes256GcmCipher, EncryptionKey, KEY_SIZE};
pub use client::{MockCalls, MockClient, SyncClient};
pub use config::{CollisionPolicy, ReceiveConfig, SyncConfig};
pub use context::SyncContext;
pub use engine::{SaveOptions, SyncEngine, SyncStats};
pub use error::{BatchFailure, ItemFailure, SyncError, SyncResult};
pub use events::{EventSink, SyncEvent};
pub use local_store::{LocalStore, MemoryLocalStore};
pub use locks::{IdentityGuard, IdentityLocks};
pub use object::{checksum_of, seal, unseal, Encodable, Identifiable, Mergeable, SyncObject};
pub use receive::{PullReport, ReceiveEngine, ReceiveOutcome, ReceiveReport};
pub use resolver::{ConflictResolver, LastWriteWins, LocalWins, MergeableResolver, RemoteWins};
pub use router::{ReceiveRouter, RoutedReport, TypedReceiver};
pub use throttle::sample;
pub use wire_client::{WireClient, WireTransport};

pub use objsync_protocol::{ConflictDetails, ConflictPolicy, Envelope, Timestamps};

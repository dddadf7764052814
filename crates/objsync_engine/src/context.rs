//! Shared collaborators of the engines.

use crate::checksum_store::ChecksumStore;
use crate::cipher::{PayloadCipher, Plaintext};
use crate::client::SyncClient;
use crate::events::{EventSink, SyncEvent};
use crate::local_store::LocalStore;
use crate::locks::IdentityLocks;
use crate::error::SyncResult;
use crate::object::SyncObject;
use crate::resolver::{ConflictResolver, LastWriteWins};
use objsync_codec::Checksum;
use objsync_protocol::{Envelope, ProtocolError};
use std::sync::Arc;

/// Everything an engine for `T` talks to.
///
/// Cloning is cheap; clones share the same stores, locks and sink.
pub struct SyncContext<T> {
    pub(crate) client: Arc<dyn SyncClient>,
    pub(crate) checksums: Arc<dyn ChecksumStore>,
    pub(crate) local: Arc<dyn LocalStore<T>>,
    pub(crate) resolver: Arc<dyn ConflictResolver<T>>,
    pub(crate) locks: Arc<IdentityLocks>,
    pub(crate) events: Arc<EventSink>,
    pub(crate) cipher: Arc<dyn PayloadCipher>,
}

impl<T: SyncObject> SyncContext<T> {
    /// Creates a context resolving conflicts with [`LastWriteWins`].
    pub fn new(
        client: Arc<dyn SyncClient>,
        checksums: Arc<dyn ChecksumStore>,
        local: Arc<dyn LocalStore<T>>,
    ) -> Self {
        Self {
            client,
            checksums,
            local,
            resolver: Arc::new(LastWriteWins),
            locks: Arc::new(IdentityLocks::new()),
            events: Arc::new(EventSink::disabled()),
            cipher: Arc::new(Plaintext),
        }
    }

    /// Sets the conflict resolver.
    pub fn with_resolver(mut self, resolver: impl ConflictResolver<T> + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Sets the event sink.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Arc::new(events);
        self
    }

    /// Shares an identity lock table with other contexts.
    pub fn with_locks(mut self, locks: Arc<IdentityLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Encrypts payloads before they leave the device.
    ///
    /// Every device syncing the same objects must use the same key.
    pub fn with_cipher(mut self, cipher: impl PayloadCipher + 'static) -> Self {
        self.cipher = Arc::new(cipher);
        self
    }

    /// Seals an object, encrypting its payload.
    pub fn seal(&self, object: &T) -> SyncResult<Envelope> {
        let id = object.id();
        let payload = self.cipher.encrypt(id, object.encode()?)?;
        Ok(Envelope::seal(id, T::TYPE_TAG, payload, object.timestamps()))
    }

    /// Verifies an envelope, decrypts its payload and decodes it.
    pub fn unseal(&self, envelope: &Envelope) -> SyncResult<T> {
        envelope.verify()?;
        let id = envelope.id();
        let payload = envelope
            .payload()
            .cloned()
            .ok_or(ProtocolError::MissingPayload { id })?;
        T::decode(&self.cipher.decrypt(id, payload)?)
    }

    /// Checksum the remote would store for `object`.
    pub fn checksum_of(&self, object: &T) -> SyncResult<Checksum> {
        Ok(self.seal(object)?.checksum())
    }

    /// The remote client.
    pub fn client(&self) -> &Arc<dyn SyncClient> {
        &self.client
    }

    /// The checksum store.
    pub fn checksums(&self) -> &Arc<dyn ChecksumStore> {
        &self.checksums
    }

    /// The local store.
    pub fn local(&self) -> &Arc<dyn LocalStore<T>> {
        &self.local
    }

    /// Events dropped because the channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        self.events.emit(event);
    }
}

impl<T> Clone for SyncContext<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            checksums: self.checksums.clone(),
            local: self.local.clone(),
            resolver: self.resolver.clone(),
            locks: self.locks.clone(),
            events: self.events.clone(),
            cipher: self.cipher.clone(),
        }
    }
}

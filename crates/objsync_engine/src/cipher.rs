//! Client-side payload encryption.
//!
//! Payloads are encrypted before they are sealed, so the remote stores and
//! checksums ciphertext only. Encryption must be deterministic: the same
//! plaintext under the same key yields the same bytes, otherwise an unchanged
//! object would look modified on every save.

use crate::error::SyncResult;
use bytes::Bytes;
use uuid::Uuid;

#[cfg(feature = "encryption")]
pub use self::aes::{Aes256GcmCipher, EncryptionKey, KEY_SIZE};

/// Transforms payloads between their canonical encoding and what is stored
/// remotely.
pub trait PayloadCipher: Send + Sync {
    /// Encrypts the canonical encoding of object `id`.
    fn encrypt(&self, id: Uuid, plaintext: Bytes) -> SyncResult<Bytes>;

    /// Decrypts a payload produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, id: Uuid, payload: Bytes) -> SyncResult<Bytes>;
}

/// Stores payloads as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl PayloadCipher for Plaintext {
    fn encrypt(&self, _id: Uuid, plaintext: Bytes) -> SyncResult<Bytes> {
        Ok(plaintext)
    }

    fn decrypt(&self, _id: Uuid, payload: Bytes) -> SyncResult<Bytes> {
        Ok(payload)
    }
}

#[cfg(feature = "encryption")]
mod aes {
    use super::PayloadCipher;
    use crate::error::{SyncError, SyncResult};
    use aes_gcm::aead::generic_array::GenericArray;
    use aes_gcm::aead::{Aead, KeyInit, Payload};
    use aes_gcm::{Aes256Gcm, Nonce};
    use bytes::Bytes;
    use hkdf::Hkdf;
    use hmac::{Hmac, Mac};
    use rand::RngCore;
    use sha2::Sha256;
    use uuid::Uuid;
    use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

    type HmacSha256 = Hmac<Sha256>;

    /// Size of the AES-256 key in bytes.
    pub const KEY_SIZE: usize = 32;
    const NONCE_SIZE: usize = 12;
    const TAG_SIZE: usize = 16;
    const KEY_ID_SIZE: usize = 8;
    const MAGIC: &[u8; 4] = b"OSE1";
    const HEADER_SIZE: usize = MAGIC.len() + KEY_ID_SIZE + NONCE_SIZE;

    /// Master key for payload encryption.
    ///
    /// Zeroized on drop.
    #[derive(Clone, Zeroize, ZeroizeOnDrop)]
    pub struct EncryptionKey {
        bytes: [u8; KEY_SIZE],
    }

    impl EncryptionKey {
        /// Generates a random key.
        #[must_use]
        pub fn generate() -> Self {
            let mut bytes = [0u8; KEY_SIZE];
            rand::thread_rng().fill_bytes(&mut bytes);
            Self { bytes }
        }

        /// Creates a key from exactly 32 raw bytes.
        pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
            if bytes.len() != KEY_SIZE {
                return Err(SyncError::Encryption(format!(
                    "key must be {KEY_SIZE} bytes, got {}",
                    bytes.len()
                )));
            }
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(bytes);
            Ok(Self { bytes: key })
        }

        /// Derives a key from a high-entropy passphrase with HKDF-SHA256.
        pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> SyncResult<Self> {
            let mut bytes = [0u8; KEY_SIZE];
            expand(passphrase, Some(salt), b"objsync-master-key-v1", &mut bytes)?;
            Ok(Self { bytes })
        }
    }

    impl std::fmt::Debug for EncryptionKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("EncryptionKey")
                .field("bytes", &"[REDACTED]")
                .finish()
        }
    }

    fn expand(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], out: &mut [u8]) -> SyncResult<()> {
        Hkdf::<Sha256>::new(salt, ikm)
            .expand(info, out)
            .map_err(|_| SyncError::Encryption("key derivation failed".into()))
    }

    /// Deterministic AES-256-GCM.
    ///
    /// Sealed payload layout: `"OSE1" || key id (8) || nonce (12) || ciphertext || tag (16)`.
    /// The nonce is an HMAC of the object ID and plaintext, and the object ID
    /// is bound as associated data. The key id lets a device tell a payload
    /// sealed under another key apart from a corrupted one.
    pub struct Aes256GcmCipher {
        cipher: Aes256Gcm,
        nonce_mac: HmacSha256,
        key_id: [u8; KEY_ID_SIZE],
    }

    impl Aes256GcmCipher {
        /// Derives the payload, nonce and key-id subkeys from `key`.
        pub fn new(key: &EncryptionKey) -> SyncResult<Self> {
            let mut payload_key = Zeroizing::new([0u8; KEY_SIZE]);
            let mut nonce_key = Zeroizing::new([0u8; KEY_SIZE]);
            let mut key_id = [0u8; KEY_ID_SIZE];
            expand(&key.bytes, None, b"objsync-payload-key-v1", &mut payload_key[..])?;
            expand(&key.bytes, None, b"objsync-nonce-key-v1", &mut nonce_key[..])?;
            expand(&key.bytes, None, b"objsync-key-id-v1", &mut key_id)?;

            let nonce_mac = <HmacSha256 as Mac>::new_from_slice(&nonce_key[..])
                .map_err(|e| SyncError::Encryption(e.to_string()))?;
            Ok(Self {
                cipher: Aes256Gcm::new(GenericArray::from_slice(&payload_key[..])),
                nonce_mac,
                key_id,
            })
        }

        /// Public identifier of the key, safe to log.
        pub fn key_id(&self) -> String {
            hex::encode(self.key_id)
        }
    }

    impl PayloadCipher for Aes256GcmCipher {
        fn encrypt(&self, id: Uuid, plaintext: Bytes) -> SyncResult<Bytes> {
            let mut mac = self.nonce_mac.clone();
            mac.update(id.as_bytes());
            mac.update(&plaintext);
            let digest = mac.finalize().into_bytes();
            let nonce = Nonce::from_slice(&digest[..NONCE_SIZE]);

            let payload = Payload {
                msg: &plaintext,
                aad: id.as_bytes(),
            };
            let ciphertext = self
                .cipher
                .encrypt(nonce, payload)
                .map_err(|_| SyncError::Encryption(format!("cannot encrypt {id}")))?;

            let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
            sealed.extend_from_slice(MAGIC);
            sealed.extend_from_slice(&self.key_id);
            sealed.extend_from_slice(nonce);
            sealed.extend(ciphertext);
            Ok(Bytes::from(sealed))
        }

        fn decrypt(&self, id: Uuid, payload: Bytes) -> SyncResult<Bytes> {
            if payload.len() < HEADER_SIZE + TAG_SIZE || !payload.starts_with(MAGIC) {
                return Err(SyncError::Encryption(format!("payload of {id} is not encrypted")));
            }
            let (header, ciphertext) = payload.split_at(HEADER_SIZE);
            let (key_id, nonce) = header[MAGIC.len()..].split_at(KEY_ID_SIZE);
            if key_id != self.key_id.as_slice() {
                return Err(SyncError::KeyMismatch { id });
            }

            let payload = Payload {
                msg: ciphertext,
                aad: id.as_bytes(),
            };
            self.cipher
                .decrypt(Nonce::from_slice(nonce), payload)
                .map(Bytes::from)
                .map_err(|_| SyncError::Encryption(format!("cannot decrypt {id}")))
        }
    }

    impl std::fmt::Debug for Aes256GcmCipher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Aes256GcmCipher")
                .field("key_id", &self.key_id())
                .finish()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn cipher() -> Aes256GcmCipher {
            Aes256GcmCipher::new(&EncryptionKey::generate()).unwrap()
        }

        #[test]
        fn same_plaintext_same_ciphertext() {
            let cipher = cipher();
            let id = Uuid::new_v4();
            let a = cipher.encrypt(id, Bytes::from_static(b"body")).unwrap();
            let b = cipher.encrypt(id, Bytes::from_static(b"body")).unwrap();
            assert_eq!(a, b);
            assert_ne!(&a[HEADER_SIZE..], b"body");

            let other = cipher.encrypt(Uuid::new_v4(), Bytes::from_static(b"body")).unwrap();
            assert_ne!(a, other);
            assert_eq!(cipher.decrypt(id, a).unwrap(), Bytes::from_static(b"body"));
        }

        #[test]
        fn other_key_is_reported_as_mismatch() {
            let id = Uuid::new_v4();
            let sealed = cipher().encrypt(id, Bytes::from_static(b"secret")).unwrap();
            assert!(matches!(
                cipher().decrypt(id, sealed),
                Err(SyncError::KeyMismatch { .. })
            ));
        }

        #[test]
        fn payload_is_bound_to_its_object() {
            let cipher = cipher();
            let sealed = cipher.encrypt(Uuid::new_v4(), Bytes::from_static(b"secret")).unwrap();
            assert!(matches!(
                cipher.decrypt(Uuid::new_v4(), sealed),
                Err(SyncError::Encryption(_))
            ));
        }

        #[test]
        fn corrupted_or_plain_payload_fails() {
            let cipher = cipher();
            let id = Uuid::new_v4();
            let mut sealed = cipher.encrypt(id, Bytes::from_static(b"data")).unwrap().to_vec();
            let last = sealed.len() - 1;
            sealed[last] ^= 0xFF;
            assert!(cipher.decrypt(id, Bytes::from(sealed)).is_err());
            assert!(cipher.decrypt(id, Bytes::from_static(b"\xa1\x61a\x01")).is_err());
        }

        #[test]
        fn passphrase_derivation_is_stable() {
            let a = EncryptionKey::derive_from_passphrase(b"correct horse", b"salt").unwrap();
            let b = EncryptionKey::derive_from_passphrase(b"correct horse", b"salt").unwrap();
            let c = EncryptionKey::derive_from_passphrase(b"correct horse", b"pepper").unwrap();
            assert_eq!(
                Aes256GcmCipher::new(&a).unwrap().key_id(),
                Aes256GcmCipher::new(&b).unwrap().key_id()
            );
            assert_ne!(
                Aes256GcmCipher::new(&a).unwrap().key_id(),
                Aes256GcmCipher::new(&c).unwrap().key_id()
            );
            assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        }
    }
}

//! # objsync codec
//!
//! Canonical CBOR encoding and content checksums for objsync.
//!
//! Sync relies on comparing checksums computed on different devices, so the
//! encoding of a domain object must be a pure function of its content:
//! - Identical inputs produce identical bytes
//! - Field and map insertion order never leaks into the output
//! - The checksum is SHA-256 over those bytes
//!
//! ## Usage
//!
//! ```
//! use objsync_codec::{to_canonical_bytes, from_canonical_bytes, Checksum};
//! use std::collections::BTreeMap;
//!
//! let mut value = BTreeMap::new();
//! value.insert("title".to_string(), "Doc 1".to_string());
//!
//! let bytes = to_canonical_bytes(&value).unwrap();
//! let checksum = Checksum::of(&bytes);
//!
//! let decoded: BTreeMap<String, String> = from_canonical_bytes(&bytes).unwrap();
//! assert_eq!(decoded, value);
//! assert_eq!(checksum, Checksum::of_value(&decoded).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod checksum;
mod error;

pub use canonical::{canonicalize, from_canonical_bytes, is_canonical, to_canonical_bytes};
pub use checksum::Checksum;
pub use error::{CodecError, CodecResult};

/// Encodes a value canonically and returns the bytes with their checksum.
pub fn encode_with_checksum<T: serde::Serialize + ?Sized>(
    value: &T,
) -> CodecResult<(Vec<u8>, Checksum)> {
    let bytes = to_canonical_bytes(value)?;
    let checksum = Checksum::of(&bytes);
    Ok((bytes, checksum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_matches_bytes() {
        let (bytes, checksum) = encode_with_checksum(&vec![1u32, 2, 3]).unwrap();
        assert_eq!(Checksum::of(&bytes), checksum);
    }

    #[test]
    fn different_content_different_checksum() {
        let (_, a) = encode_with_checksum("Doc 1").unwrap();
        let (_, b) = encode_with_checksum("Doc 2").unwrap();
        assert_ne!(a, b);
    }
}

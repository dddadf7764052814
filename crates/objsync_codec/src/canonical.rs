//! Canonical CBOR encoding of serde values.

use crate::error::{CodecError, CodecResult};
use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;

/// Encode a serializable value to canonical CBOR bytes.
///
/// The value is first encoded as plain CBOR and read back as a [`Value`]
/// tree, so serde impls see the same serializer flags they see when
/// decoding. The tree is then canonicalized:
/// - Map entries are sorted by the encoding of their keys (length-first,
///   then bytewise), as in RFC 8949 Section 4.2.1
/// - Duplicate map keys are rejected
/// - NaN is rejected and negative zero is folded into zero
///
/// Two values that differ only in field or map insertion order produce
/// identical bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized or holds a NaN.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut plain = Vec::new();
    ciborium::ser::into_writer(value, &mut plain)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    let value: Value = ciborium::de::from_reader(plain.as_slice())
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    let value = canonicalize(value)?;
    encode_value(&value)
}

/// Decode CBOR bytes into a deserializable value.
///
/// Decoding is lenient about key order; canonical form only matters when
/// bytes are hashed.
pub fn from_canonical_bytes<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Returns true if `bytes` are already in canonical form.
pub fn is_canonical(bytes: &[u8]) -> CodecResult<bool> {
    let value: Value = from_canonical_bytes(bytes)?;
    let reencoded = encode_value(&canonicalize(value)?)?;
    Ok(reencoded == bytes)
}

/// Rewrite a value tree into canonical form.
pub fn canonicalize(value: Value) -> CodecResult<Value> {
    match value {
        Value::Map(entries) => canonicalize_map(entries),
        Value::Array(items) => items
            .into_iter()
            .map(canonicalize)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        Value::Tag(tag, inner) => Ok(Value::Tag(tag, Box::new(canonicalize(*inner)?))),
        Value::Float(f) if f.is_nan() => Err(CodecError::NaNForbidden),
        // -0.0 == 0.0 but encodes differently
        Value::Float(f) if f == 0.0 => Ok(Value::Float(0.0)),
        other => Ok(other),
    }
}

fn canonicalize_map(entries: Vec<(Value, Value)>) -> CodecResult<Value> {
    let mut keyed = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let key = canonicalize(key)?;
        let value = canonicalize(value)?;
        let encoded_key = encode_value(&key)?;
        keyed.push((encoded_key, key, value));
    }

    keyed.sort_by(|a, b| cmp_encoded_keys(&a.0, &b.0));

    if keyed.windows(2).any(|pair| pair[0].0 == pair[1].0) {
        return Err(CodecError::non_canonical("duplicate map key"));
    }

    Ok(Value::Map(
        keyed.into_iter().map(|(_, key, value)| (key, value)).collect(),
    ))
}

fn cmp_encoded_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn encode_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buffer = Vec::new();
    ciborium::ser::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

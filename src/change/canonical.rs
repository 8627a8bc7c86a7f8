//! Canonical JSON encoding and fingerprinting
//!
//! Fingerprints must be stable across processes, so objects are encoded with
//! their keys sorted at every depth. Arrays keep their order.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Recursively rebuild `value` with sorted object keys
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Encode any serializable value as compact, key-sorted JSON bytes
///
/// # Errors
///
/// Returns the serializer error if `value` cannot be represented as JSON.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&canonicalize(&value))
}

/// SHA-256 of raw bytes, lowercase hex
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint a value: SHA-256 over its canonical encoding
///
/// # Errors
///
/// Returns the serializer error if `value` cannot be represented as JSON.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    canonical_bytes(value).map(|bytes| hash_bytes(&bytes))
}

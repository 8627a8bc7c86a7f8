//! Keyed fingerprint store
//!
//! [`ChangeDetector`] remembers one digest per key and answers whether a new
//! value differs from what was last recorded. It carries no domain logic: the
//! state tracker uses one instance per inbound.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;

use super::canonical::fingerprint;

/// Concurrent map of key to content digest
#[derive(Debug, Default)]
pub struct ChangeDetector {
    hashes: RwLock<HashMap<String, String>>,
}

impl ChangeDetector {
    /// Create an empty detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint `value` and store it under `key`
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` is not representable as JSON;
    /// the store is left untouched.
    pub fn set_hash<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        let hash = fingerprint(value)?;
        self.hashes.write().insert(key.to_string(), hash);
        Ok(())
    }

    /// Store a digest computed elsewhere
    pub fn set_raw_hash(&self, key: &str, hash: impl Into<String>) {
        self.hashes.write().insert(key.to_string(), hash.into());
    }

    /// Whether `value` differs from the stored digest
    ///
    /// An unknown key counts as changed.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` is not representable as JSON.
    pub fn has_changed<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, serde_json::Error> {
        let hash = fingerprint(value)?;
        Ok(self.hashes.read().get(key) != Some(&hash))
    }

    /// Store the digest of `value` if it differs, returning whether it did
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` is not representable as JSON.
    pub fn update_if_changed<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, serde_json::Error> {
        let hash = fingerprint(value)?;

        let mut hashes = self.hashes.write();
        if hashes.get(key) == Some(&hash) {
            return Ok(false);
        }
        hashes.insert(key.to_string(), hash);
        Ok(true)
    }

    /// Stored digest for `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.hashes.read().get(key).cloned()
    }

    /// Forget `key`
    pub fn delete(&self, key: &str) {
        self.hashes.write().remove(key);
    }

    /// Forget every key
    pub fn clear(&self) {
        self.hashes.write().clear();
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.hashes.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.hashes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_missing_key_has_changed() {
        let detector = ChangeDetector::new();
        assert!(detector.has_changed("users", &json!(["alice"])).unwrap());
        assert!(detector.get("users").is_none());
    }

    #[test]
    fn test_set_then_unchanged() {
        let detector = ChangeDetector::new();
        detector.set_hash("users", &json!({"b": 2, "a": 1})).unwrap();

        assert!(!detector.has_changed("users", &json!({"a": 1, "b": 2})).unwrap());
        assert!(detector.has_changed("users", &json!({"a": 1, "b": 3})).unwrap());
    }

    #[test]
    fn test_update_if_changed() {
        let detector = ChangeDetector::new();
        assert!(detector.update_if_changed("k", &json!([1, 2])).unwrap());
        assert!(!detector.update_if_changed("k", &json!([1, 2])).unwrap());
        assert!(detector.update_if_changed("k", &json!([2, 1])).unwrap());
        assert_eq!(detector.len(), 1);
    }

    #[test]
    fn test_raw_hash_is_stored_verbatim() {
        let detector = ChangeDetector::new();
        detector.set_raw_hash("users", "deadbeef");
        assert_eq!(detector.get("users").as_deref(), Some("deadbeef"));

        // A raw hash never equals a computed digest of the same text
        assert!(detector.has_changed("users", "deadbeef").unwrap());
    }

    #[test]
    fn test_delete_and_clear() {
        let detector = ChangeDetector::new();
        detector.set_raw_hash("a", "1");
        detector.set_raw_hash("b", "2");
        assert_eq!(detector.keys(), vec!["a".to_string(), "b".to_string()]);

        detector.delete("a");
        assert!(detector.get("a").is_none());
        assert_eq!(detector.len(), 1);

        detector.clear();
        assert!(detector.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        let detector = Arc::new(ChangeDetector::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let detector = Arc::clone(&detector);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        let key = format!("k{}", j % 10);
                        detector.set_hash(&key, &json!({"writer": i, "n": j})).unwrap();
                        let _ = detector.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(detector.len(), 10);
    }
}

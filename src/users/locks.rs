//! Per-inbound mutation locks
//!
//! Each inbound tag gets its own async mutex, created on first use. Tags are
//! never pruned, so the registry grows with the number of distinct tags seen
//! over the process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

/// Lazily populated registry of tag locks
#[derive(Debug, Default)]
pub struct TagLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl TagLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock object for `tag`, creating it if needed
    ///
    /// Concurrent callers for the same new tag always get the same object.
    pub fn get(&self, tag: &str) -> Arc<Mutex<()>> {
        // Fast path (read lock)
        {
            let locks = self.locks.read();
            if let Some(lock) = locks.get(tag) {
                return Arc::clone(lock);
            }
        }

        // Double-check under the write lock
        let mut locks = self.locks.write();
        Arc::clone(locks.entry(tag.to_string()).or_default())
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_tag_same_lock() {
        let locks = TagLocks::new();
        let a = locks.get("vless-in");
        let b = locks.get("vless-in");
        let c = locks.get("trojan-in");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_concurrent_creation_yields_one_lock() {
        let locks = Arc::new(TagLocks::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                std::thread::spawn(move || locks.get("shared"))
            })
            .collect();

        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(got.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_serializes() {
        let locks = TagLocks::new();
        let lock = locks.get("ss-in");
        let _held = lock.lock().await;
        assert!(locks.get("ss-in").try_lock().is_err());
        assert!(locks.get("other").try_lock().is_ok());
    }
}

//! Distributed store seam and in-memory implementation.
//!
//! The trait deliberately exposes only atomic primitives. Anything a caller
//! could express as read-then-write is a race across processes, so the
//! conditional operations (`set_if_absent`, `delete_if_equals`) must be
//! atomic in the backing store — Redis `SET NX EX` and a Lua compare-delete,
//! a database upsert with a guard clause, or the mutex-held section of
//! [`InMemoryStore`] below.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palisade_core::clock::advance;
use palisade_core::{Clock, StoreError, SystemClock, Timestamp};

use crate::sync::mutex_lock;

/// Shared key/value store with TTL-expiring writes.
///
/// Implementations must be safe to call from any task. Every operation may
/// fail with [`StoreError::Unavailable`]; callers are expected to degrade to
/// a direct origin fetch rather than propagate it to readers.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    /// Read the raw bytes for a key, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Write a value only if the key is currently absent.
    ///
    /// Returns `true` when this call created the key. This is the primitive
    /// repopulation locks are built on.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove a key unconditionally.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove a key only while it still holds exactly `expected`.
    ///
    /// Returns `true` when the key was removed. Lock release uses this to
    /// avoid deleting a lock a later holder re-acquired.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    /// Remove every key starting with `prefix`. Returns how many were
    /// removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<Timestamp>,
}

impl StoredValue {
    fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

/// Mutex-guarded hash map implementing [`DistributedStore`].
///
/// Expiry is lazy: dead values are dropped when an operation touches them.
/// Serves as the test double and as a single-node deployment's store.
pub struct InMemoryStore {
    values: Mutex<HashMap<String, StoredValue>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn expires_at(&self, ttl: Duration) -> Option<Timestamp> {
        if ttl.is_zero() {
            None
        } else {
            Some(advance(self.clock.now(), ttl))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now();
        let mut values = mutex_lock(&self.values, "store.get");
        match values.get(key) {
            Some(stored) if stored.is_expired(now) => {
                values.remove(key);
                Ok(None)
            }
            Some(stored) => Ok(Some(stored.bytes.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let stored = StoredValue {
            bytes: value.to_vec(),
            expires_at: self.expires_at(ttl),
        };
        mutex_lock(&self.values, "store.set").insert(key.to_string(), stored);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expires_at(ttl);
        let mut values = mutex_lock(&self.values, "store.set_if_absent");
        if matches!(values.get(key), Some(stored) if !stored.is_expired(now)) {
            return Ok(false);
        }
        values.insert(
            key.to_string(),
            StoredValue {
                bytes: value.to_vec(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        mutex_lock(&self.values, "store.delete").remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut values = mutex_lock(&self.values, "store.delete_if_equals");
        match values.get(key) {
            Some(stored) if stored.is_expired(now) => {
                values.remove(key);
                Ok(false)
            }
            Some(stored) if stored.bytes == expected => {
                values.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let mut values = mutex_lock(&self.values, "store.delete_prefix");
        let before = values.len();
        values.retain(|key, _| !key.starts_with(prefix));
        Ok((before - values.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = InMemoryStore::new();
        store
            .set("k", b"value", Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = InMemoryStore::new();
        assert!(store
            .set_if_absent("k", b"first", Duration::from_secs(60))
            .await
            .expect("first"));
        assert!(!store
            .set_if_absent("k", b"second", Duration::from_secs(60))
            .await
            .expect("second"));
        assert_eq!(store.get("k").await.expect("get"), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_if_equals_checks_value() {
        let store = InMemoryStore::new();
        store
            .set("k", b"mine", Duration::from_secs(60))
            .await
            .expect("set");

        assert!(!store.delete_if_equals("k", b"theirs").await.expect("cad"));
        assert!(store.get("k").await.expect("get").is_some());

        assert!(store.delete_if_equals("k", b"mine").await.expect("cad"));
        assert!(store.get("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = InMemoryStore::new();
        for key in ["prompt:a:version:1", "prompt:a:version:2", "prompt:b:version:1"] {
            store.set(key, b"v", Duration::from_secs(60)).await.expect("set");
        }
        let removed = store.delete_prefix("prompt:a:").await.expect("delete");
        assert_eq!(removed, 2);
        assert!(store.get("prompt:b:version:1").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = InMemoryStore::new();
        store.set("k", b"v", Duration::ZERO).await.expect("set");
        assert!(store.get("k").await.expect("get").is_some());
    }
}

//! Palisade Test Utilities
//!
//! Shared test infrastructure for the Palisade workspace:
//! - Mock origin fetchers (counting, slow, failing)
//! - A manually-advanced clock for freshness arithmetic
//! - A fault-injecting distributed store wrapper

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palisade_cache::{DistributedStore, OriginFetcher};
use palisade_core::{CacheKey, Clock, OriginError, StoreError, Timestamp};

// Re-export the types almost every test touches.
pub use palisade_cache::InMemoryStore;
pub use palisade_core::{CacheConfig, CacheEntry, FreshnessState, PromptSelector};

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// A clock that only moves when told to.
///
/// Freshness windows are computed against this, so tests step through
/// TTL boundaries without sleeping.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now = palisade_core::clock::advance(*now, by);
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: Timestamp) {
        *self.now.lock().expect("clock lock") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("clock lock")
    }
}

// ============================================================================
// MOCK ORIGIN
// ============================================================================

/// A scriptable origin fetcher that counts its calls.
///
/// The response can be swapped mid-test to simulate the origin's value
/// changing between a fill and a refresh.
pub struct MockOrigin<V> {
    response: Mutex<Result<V, OriginError>>,
    latency: Option<Duration>,
    calls: AtomicU64,
}

impl<V: Clone + Send + Sync> MockOrigin<V> {
    pub fn returning(value: V) -> Self {
        Self {
            response: Mutex::new(Ok(value)),
            latency: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn failing(error: OriginError) -> Self {
        Self {
            response: Mutex::new(Err(error)),
            latency: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Make every fetch take `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the scripted response with a success.
    pub fn set_response(&self, value: V) {
        *self.response.lock().expect("response lock") = Ok(value);
    }

    /// Replace the scripted response with a failure.
    pub fn set_failure(&self, error: OriginError) {
        *self.response.lock().expect("response lock") = Err(error);
    }

    /// How many times the origin was consulted.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V: Clone + Send + Sync> OriginFetcher<V> for MockOrigin<V> {
    async fn fetch(&self, _key: &CacheKey) -> Result<V, OriginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.response.lock().expect("response lock").clone()
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// Wraps a [`DistributedStore`] and injects `Unavailable` failures.
pub struct FlakyStore {
    inner: Arc<dyn DistributedStore>,
    /// Remaining operations to fail; negative means fail forever.
    failures_remaining: AtomicI64,
    /// When set, only the conditional primitives (`set_if_absent`,
    /// `delete_if_equals`) fail — the knobs locking is built on.
    conditional_ops_only: AtomicBool,
}

impl FlakyStore {
    pub fn wrapping(inner: Arc<dyn DistributedStore>) -> Self {
        Self {
            inner,
            failures_remaining: AtomicI64::new(0),
            conditional_ops_only: AtomicBool::new(false),
        }
    }

    /// Fail the next `n` operations, then recover.
    pub fn fail_next(&self, n: i64) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every operation until further notice.
    pub fn fail_always(&self) {
        self.failures_remaining.store(-1, Ordering::SeqCst);
    }

    /// Fail only the conditional primitives, leaving plain reads and writes
    /// working. Lets a test break lock acquisition in isolation.
    pub fn fail_conditional_ops(&self) {
        self.conditional_ops_only.store(true, Ordering::SeqCst);
        self.failures_remaining.store(-1, Ordering::SeqCst);
    }

    /// Stop injecting failures.
    pub fn recover(&self) {
        self.failures_remaining.store(0, Ordering::SeqCst);
        self.conditional_ops_only.store(false, Ordering::SeqCst);
    }

    fn check(&self, conditional_op: bool) -> Result<(), StoreError> {
        if self.conditional_ops_only.load(Ordering::SeqCst) && !conditional_op {
            return Ok(());
        }
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        let failing = if remaining < 0 {
            true
        } else if remaining == 0 {
            false
        } else {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0
        };
        if failing {
            Err(StoreError::Unavailable {
                reason: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check(false)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check(false)?;
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check(true)?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check(false)?;
        self.inner.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        self.check(true)?;
        self.inner.delete_if_equals(key, expected).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.check(false)?;
        self.inner.delete_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_only_when_told() {
        let clock = ManualClock::starting_now();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_mock_origin_counts_and_reswitches() {
        let origin = MockOrigin::returning("v1".to_string());
        let key = CacheKey::new("p", &PromptSelector::Latest);

        assert_eq!(origin.fetch(&key).await, Ok("v1".to_string()));
        origin.set_response("v2".to_string());
        assert_eq!(origin.fetch(&key).await, Ok("v2".to_string()));
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store = FlakyStore::wrapping(Arc::new(InMemoryStore::new()));
        store.fail_next(1);

        assert!(store.get("k").await.is_err());
        assert!(store.get("k").await.is_ok());

        store.fail_always();
        assert!(store.set("k", b"v", Duration::from_secs(1)).await.is_err());
        store.recover();
        assert!(store.set("k", b"v", Duration::from_secs(1)).await.is_ok());
    }
}

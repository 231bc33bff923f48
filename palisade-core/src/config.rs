//! Configuration for the cache engine.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Tuning knobs consumed (not owned) by the cache engine.
///
/// Wiring these from files or the environment is the embedding
/// application's job.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a fetched value counts as fresh.
    pub ttl: Duration,
    /// Grace window after `ttl` during which stale values are served while a
    /// background refresh runs. Zero disables stale-while-revalidate.
    pub stale_ttl: Duration,
    /// Upper bound on entries held in the local LRU tier.
    pub max_local_entries: usize,
    /// Lifetime of a repopulation lock; crashed holders free up after this.
    pub lock_ttl: Duration,
    /// Number of background refresh workers.
    pub refresh_pool_size: usize,
    /// Refresh tasks queued beyond the pool before new submissions drop.
    pub refresh_queue_size: usize,
    /// Waits between store re-reads while another process holds the lock.
    pub backoff_schedule: Vec<Duration>,
    /// Budget for a synchronous origin call.
    pub origin_timeout: Duration,
    /// Budget for a background refresh; expired refreshes are abandoned.
    pub refresh_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_ttl: Duration::from_secs(300),
            max_local_entries: 1_000,
            lock_ttl: Duration::from_secs(10),
            refresh_pool_size: 5,
            refresh_queue_size: 32,
            backoff_schedule: vec![
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(200),
            ],
            origin_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fresh TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the stale-while-revalidate grace window. Zero disables SWR.
    pub fn with_stale_ttl(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = stale_ttl;
        self
    }

    /// Set the local LRU bound.
    pub fn with_max_local_entries(mut self, max: usize) -> Self {
        self.max_local_entries = max;
        self
    }

    /// Set the repopulation lock lifetime.
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    /// Set the background refresh worker count.
    pub fn with_refresh_pool_size(mut self, size: usize) -> Self {
        self.refresh_pool_size = size;
        self
    }

    /// Set the refresh queue depth.
    pub fn with_refresh_queue_size(mut self, size: usize) -> Self {
        self.refresh_queue_size = size;
        self
    }

    /// Set the lock-contention backoff schedule.
    pub fn with_backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = schedule;
        self
    }

    /// Set the synchronous origin call budget.
    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = timeout;
        self
    }

    /// Set the background refresh budget.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Whether stale-while-revalidate is in effect.
    pub fn swr_enabled(&self) -> bool {
        !self.stale_ttl.is_zero()
    }

    /// The local bound as a `NonZeroUsize`; a zero config clamps to one.
    pub fn max_local_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_local_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Physical lifetime of a distributed-store entry: twice the logical
    /// lifetime. Wholly expired entries must stay visible for a while so the
    /// stampede-protected repopulation path can tell "stale" from "never
    /// cached"; the store reclaims them after the grace window.
    pub fn store_ttl(&self) -> Duration {
        self.ttl.saturating_add(self.stale_ttl).saturating_mul(2)
    }
}

//! The read-through cache front door.
//!
//! [`PromptCache::get`] classifies every read against the entry's freshness
//! windows and routes it:
//!
//! - **FRESH** — serve from the local tier, no I/O.
//! - **REVALIDATE** — serve the stale value, enqueue one deduplicated
//!   background refresh.
//! - **MISS** — no entry anywhere; fetch the origin synchronously and store.
//! - **STALE** (distributed mode) — re-read the shared tier in case another
//!   process already repopulated it, then race for the repopulation lock;
//!   losers re-read on a bounded backoff schedule and, if the winner never
//!   shows, fall through to a direct origin call. Every path is bounded in
//!   time; no reader waits forever.
//!
//! Store trouble never reaches the caller of `get` — it always degrades to
//! fetching the origin directly. Only an origin failure with no fallback
//! configured surfaces.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(RedisStore::connect(url).await?);
//! let cache: PromptCache<PromptBody> =
//!     PromptCache::new(CacheConfig::default()).backed_by(store);
//!
//! let key = CacheKey::new("greeting", &PromptSelector::Latest);
//! let body = cache.get(&key, Arc::clone(&fetcher), GetOptions::new()).await?;
//! ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use palisade_core::{
    CacheConfig, CacheEntry, CacheError, CacheKey, CacheResult, CacheStats, Clock, FreshnessState,
    OriginError, StatsSnapshot, StoreError, SystemClock,
};

use crate::local::LocalCache;
use crate::lock::LockManager;
use crate::refresh::RefreshScheduler;
use crate::store::DistributedStore;

/// Fetches the authoritative value for a key from the origin.
///
/// Supplied per call so one cache instance can front heterogeneous lookups;
/// the transport, auth, and parsing behind it are the collaborator's
/// business. Implementations must be callable from any task.
#[async_trait]
pub trait OriginFetcher<V>: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<V, OriginError>;
}

/// Per-call options for [`PromptCache::get`].
#[derive(Debug, Clone)]
pub struct GetOptions<V> {
    /// Returned — without being cached — when the origin fails.
    pub fallback: Option<V>,
    /// Overrides the configured synchronous origin budget for this call.
    pub origin_timeout: Option<Duration>,
}

impl<V> GetOptions<V> {
    pub fn new() -> Self {
        Self {
            fallback: None,
            origin_timeout: None,
        }
    }

    pub fn with_fallback(mut self, value: V) -> Self {
        self.fallback = Some(value);
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = Some(timeout);
        self
    }
}

impl<V> Default for GetOptions<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The public-facing cache.
///
/// Construct once per process and share by reference (or clone — clones
/// share every tier). Local-only by default; [`backed_by`](Self::backed_by)
/// attaches a distributed tier and with it stampede protection.
pub struct PromptCache<V> {
    local: Arc<LocalCache<V>>,
    store: Option<Arc<dyn DistributedStore>>,
    locks: Option<LockManager>,
    scheduler: Arc<RefreshScheduler>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    stats: Arc<CacheStats>,
}

impl<V> PromptCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a local-only cache. Must be called within a tokio runtime
    /// (the refresh scheduler spawns its dispatcher).
    pub fn new(config: CacheConfig) -> Self {
        let stats = Arc::new(CacheStats::new());
        Self {
            local: Arc::new(LocalCache::new(&config)),
            store: None,
            locks: None,
            scheduler: Arc::new(RefreshScheduler::new(&config, Arc::clone(&stats))),
            clock: Arc::new(SystemClock),
            config,
            stats,
        }
    }

    /// Attach a distributed tier; repopulation of stale keys is then gated
    /// by per-key locks in that store.
    pub fn backed_by(mut self, store: Arc<dyn DistributedStore>) -> Self {
        self.locks = Some(LockManager::new(
            Arc::clone(&store),
            Arc::clone(&self.clock),
        ));
        self.store = Some(store);
        self
    }

    /// Replace the time source. Intended for tests.
    pub fn clocked_by(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(store) = &self.store {
            self.locks = Some(LockManager::new(Arc::clone(store), Arc::clone(&clock)));
        }
        self.clock = clock;
        self
    }

    /// Look up a key, consulting the origin as the freshness state demands.
    ///
    /// The only error that surfaces is an origin failure with no fallback
    /// supplied; every store-side problem degrades internally.
    pub async fn get(
        &self,
        key: &CacheKey,
        fetcher: Arc<dyn OriginFetcher<V>>,
        options: GetOptions<V>,
    ) -> CacheResult<V> {
        let now = self.clock.now();

        if let Some(entry) = self.local.get_including_expired(key) {
            match entry.state(now) {
                FreshnessState::Fresh => {
                    self.stats.record_hit();
                    return Ok(entry.into_value());
                }
                FreshnessState::Revalidate => {
                    self.stats.record_stale_serve();
                    self.spawn_revalidation(key, fetcher);
                    return Ok(entry.into_value());
                }
                FreshnessState::Expired => {}
            }
        }

        if let (Some(store), Some(locks)) = (&self.store, &self.locks) {
            self.get_distributed(key, fetcher, options, store, locks).await
        } else {
            self.stats.record_miss();
            self.fetch_and_store(key, fetcher, options, None).await
        }
    }

    /// Drop every cached version and label of `name` from both tiers.
    ///
    /// Returns how many entries left the local tier. This is the one read
    /// path operation that surfaces store errors: the caller asked for the
    /// shared tier to change and must know if it did not.
    pub async fn invalidate(&self, name: &str) -> CacheResult<usize> {
        let prefix = CacheKey::name_prefix(name);
        let removed = self.local.invalidate_prefix(&prefix);
        if let Some(store) = &self.store {
            store
                .delete_prefix(&prefix)
                .await
                .map_err(CacheError::Store)?;
        }
        tracing::debug!(name, removed_local = removed, "invalidated prompt");
        Ok(removed)
    }

    /// Seed a fresh entry without consulting the origin.
    ///
    /// Useful after a write to the origin, to keep readers warm.
    pub async fn warm(&self, key: CacheKey, value: V) {
        let entry = self.make_entry(value);
        if let Some(store) = &self.store {
            write_store(store, &key, &entry, self.config.store_ttl()).await;
        }
        self.write_local(&key, entry);
    }

    /// Whether a background refresh for `key` is queued or running.
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        self.scheduler.is_refreshing(key)
    }

    /// Point-in-time counter values.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // STATE MACHINE INTERNALS
    // ========================================================================

    /// Local tier had nothing servable; consult the shared tier.
    async fn get_distributed(
        &self,
        key: &CacheKey,
        fetcher: Arc<dyn OriginFetcher<V>>,
        options: GetOptions<V>,
        store: &Arc<dyn DistributedStore>,
        locks: &LockManager,
    ) -> CacheResult<V> {
        match read_store_entry::<V>(store, key).await {
            Ok(Some(entry)) => match entry.state(self.clock.now()) {
                FreshnessState::Fresh => {
                    // Another process already repopulated; adopt its entry.
                    self.stats.record_hit();
                    self.write_local(key, entry.clone());
                    Ok(entry.into_value())
                }
                FreshnessState::Revalidate => {
                    self.stats.record_stale_serve();
                    self.write_local(key, entry.clone());
                    self.spawn_revalidation(key, fetcher);
                    Ok(entry.into_value())
                }
                FreshnessState::Expired => {
                    self.get_stale_protected(key, fetcher, options, store, locks)
                        .await
                }
            },
            Ok(None) => {
                self.stats.record_miss();
                self.fetch_and_store(key, fetcher, options, Some(store)).await
            }
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    error = %error,
                    "distributed store unreachable; fetching origin directly"
                );
                self.stats.record_miss();
                self.fetch_and_store(key, fetcher, options, None).await
            }
        }
    }

    /// A wholly expired entry exists: stampede-protected repopulation.
    async fn get_stale_protected(
        &self,
        key: &CacheKey,
        fetcher: Arc<dyn OriginFetcher<V>>,
        options: GetOptions<V>,
        store: &Arc<dyn DistributedStore>,
        locks: &LockManager,
    ) -> CacheResult<V> {
        self.stats.record_miss();
        match locks.try_acquire(&key.lock_key(), self.config.lock_ttl).await {
            Ok(Some(lock)) => {
                self.stats.record_lock_acquired();
                // Re-check under the lock: the previous holder may have
                // repopulated between our store read and this acquire.
                if let Ok(Some(entry)) = read_store_entry::<V>(store, key).await {
                    if entry.is_fresh(self.clock.now()) {
                        locks.release(lock).await;
                        self.write_local(key, entry.clone());
                        return Ok(entry.into_value());
                    }
                }
                let fetched = self.fetch_origin(key, fetcher.as_ref(), &options).await;
                let result = match fetched {
                    Ok(value) => {
                        let entry = self.make_entry(value.clone());
                        write_store(store, key, &entry, self.config.store_ttl()).await;
                        self.write_local(key, entry);
                        Ok(value)
                    }
                    Err(error) => Err(error),
                };
                // Release before surfacing anything, origin failure
                // included, so the key never stays locked for the full TTL.
                locks.release(lock).await;
                match result {
                    Ok(value) => Ok(value),
                    Err(error) => self.fallback_or(key, error, options),
                }
            }
            Ok(None) => {
                self.stats.record_lock_contended();
                for delay in &self.config.backoff_schedule {
                    tokio::time::sleep(*delay).await;
                    if let Ok(Some(entry)) = read_store_entry::<V>(store, key).await {
                        if entry.is_fresh(self.clock.now()) {
                            self.write_local(key, entry.clone());
                            return Ok(entry.into_value());
                        }
                    }
                }
                // The winner never materialized a value within the backoff
                // window; the bounded worst case is fetching it ourselves.
                self.fetch_and_store(key, fetcher, options, Some(store)).await
            }
            Err(error) => {
                tracing::warn!(
                    key = %key,
                    error = %error,
                    "lock store unreachable; fetching origin without stampede protection"
                );
                self.fetch_and_store(key, fetcher, options, None).await
            }
        }
    }

    /// Synchronous origin fetch; on success the entry lands in the local
    /// tier and, when given, the shared tier.
    async fn fetch_and_store(
        &self,
        key: &CacheKey,
        fetcher: Arc<dyn OriginFetcher<V>>,
        options: GetOptions<V>,
        store: Option<&Arc<dyn DistributedStore>>,
    ) -> CacheResult<V> {
        match self.fetch_origin(key, fetcher.as_ref(), &options).await {
            Ok(value) => {
                let entry = self.make_entry(value.clone());
                if let Some(store) = store {
                    write_store(store, key, &entry, self.config.store_ttl()).await;
                }
                self.write_local(key, entry);
                Ok(value)
            }
            Err(error) => self.fallback_or(key, error, options),
        }
    }

    async fn fetch_origin(
        &self,
        key: &CacheKey,
        fetcher: &dyn OriginFetcher<V>,
        options: &GetOptions<V>,
    ) -> Result<V, OriginError> {
        let budget = options.origin_timeout.unwrap_or(self.config.origin_timeout);
        match tokio::time::timeout(budget, fetcher.fetch(key)).await {
            Ok(result) => result,
            Err(_) => Err(OriginError::Timeout {
                elapsed_ms: budget.as_millis() as u64,
            }),
        }
    }

    fn fallback_or(
        &self,
        key: &CacheKey,
        error: OriginError,
        options: GetOptions<V>,
    ) -> CacheResult<V> {
        match options.fallback {
            Some(value) => {
                self.stats.record_fallback_serve();
                tracing::warn!(
                    key = %key,
                    error = %error,
                    "origin failed; serving caller-supplied fallback"
                );
                Ok(value)
            }
            None => Err(CacheError::Origin(error)),
        }
    }

    fn make_entry(&self, value: V) -> CacheEntry<V> {
        CacheEntry::new(
            value,
            self.clock.now(),
            self.config.ttl,
            self.config.stale_ttl,
        )
    }

    fn write_local(&self, key: &CacheKey, entry: CacheEntry<V>) {
        if self.local.insert(key.clone(), entry) {
            self.stats.record_eviction();
        }
    }

    /// Enqueue a deduplicated background refresh for a revalidating entry.
    ///
    /// Rejection — already in flight, or the pool is saturated — is fine:
    /// the caller already holds a servable stale value.
    fn spawn_revalidation(&self, key: &CacheKey, fetcher: Arc<dyn OriginFetcher<V>>) {
        let job_key = key.clone();
        let local = Arc::clone(&self.local);
        let store = self.store.clone();
        let clock = Arc::clone(&self.clock);
        let stats = Arc::clone(&self.stats);
        let ttl = self.config.ttl;
        let stale_ttl = self.config.stale_ttl;
        let store_ttl = self.config.store_ttl();

        let accepted = self.scheduler.submit(key.clone(), async move {
            let value = fetcher.fetch(&job_key).await?;
            // Freshness windows anchor at refresh completion, not at the
            // read that triggered the refresh.
            let entry = CacheEntry::new(value, clock.now(), ttl, stale_ttl);
            if let Some(store) = &store {
                write_store(store, &job_key, &entry, store_ttl).await;
            }
            if local.insert(job_key.clone(), entry) {
                stats.record_eviction();
            }
            Ok(())
        });
        if !accepted {
            tracing::debug!(
                key = %key,
                "refresh already in flight or pool saturated; keeping stale value"
            );
        }
    }
}

impl<V> Clone for PromptCache<V> {
    fn clone(&self) -> Self {
        Self {
            local: Arc::clone(&self.local),
            store: self.store.clone(),
            locks: self.store.as_ref().map(|store| {
                LockManager::new(Arc::clone(store), Arc::clone(&self.clock))
            }),
            scheduler: Arc::clone(&self.scheduler),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Read and decode the shared tier's entry for a key.
///
/// Undecodable payloads are discarded and treated as absent; the next write
/// replaces them.
async fn read_store_entry<V: DeserializeOwned>(
    store: &Arc<dyn DistributedStore>,
    key: &CacheKey,
) -> Result<Option<CacheEntry<V>>, StoreError> {
    let Some(bytes) = store.get(key.as_str()).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(entry) => Ok(Some(entry)),
        Err(error) => {
            tracing::warn!(
                key = %key,
                error = %error,
                "discarding undecodable store entry"
            );
            Ok(None)
        }
    }
}

/// Encode and write an entry to the shared tier; failures are logged, never
/// propagated — the local tier already has the value.
async fn write_store<V: Serialize>(
    store: &Arc<dyn DistributedStore>,
    key: &CacheKey,
    entry: &CacheEntry<V>,
    ttl: Duration,
) {
    let bytes = match serde_json::to_vec(entry) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(
                key = %key,
                error = %error,
                "failed to encode entry for distributed store"
            );
            return;
        }
    };
    if let Err(error) = store.set(key.as_str(), &bytes, ttl).await {
        tracing::warn!(
            key = %key,
            error = %error,
            "failed to write entry to distributed store"
        );
    }
}

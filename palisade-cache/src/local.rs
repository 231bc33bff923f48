//! In-process TTL+LRU cache tier.
//!
//! A pure data structure behind one mutex: no I/O, no failure modes. The
//! access-order bookkeeping comes from `lru::LruCache`, which updates
//! recency on every read and write and evicts the least-recently-used entry
//! in O(1) when the bound is exceeded; ties in recency fall back to
//! insertion order by construction of the underlying list.

use lru::LruCache;
use std::sync::Mutex;

use palisade_core::{CacheConfig, CacheEntry, CacheKey, Timestamp};

use crate::sync::mutex_lock;

/// The in-process cache tier.
///
/// Expired entries are not reaped eagerly; they sit in the structure until
/// LRU pressure or prefix invalidation removes them, and
/// [`get_including_expired`](LocalCache::get_including_expired) exists
/// precisely so the stale-while-revalidate path can still see them.
pub struct LocalCache<V> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
}

impl<V: Clone> LocalCache<V> {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.max_local_entries_non_zero())),
        }
    }

    /// Look up a key, returning the entry only while it is strictly fresh.
    ///
    /// An entry whose `fresh_until` equals `now` is already filtered out.
    /// The read still counts as an access for eviction ordering.
    pub fn get(&self, key: &CacheKey, now: Timestamp) -> Option<CacheEntry<V>> {
        let mut entries = mutex_lock(&self.entries, "local.get");
        entries.get(key).filter(|entry| entry.is_fresh(now)).cloned()
    }

    /// Look up a key regardless of TTL.
    ///
    /// Callers implementing stale-while-revalidate compute the freshness
    /// state themselves from the returned entry.
    pub fn get_including_expired(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let mut entries = mutex_lock(&self.entries, "local.get_including_expired");
        entries.get(key).cloned()
    }

    /// Insert or supersede the entry for a key.
    ///
    /// O(1) amortized: the key moves to the most-recently-used end, and if
    /// the store would exceed its bound, the least-recently-used entry is
    /// evicted. Returns `true` when such an eviction happened.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry<V>) -> bool {
        let mut entries = mutex_lock(&self.entries, "local.insert");
        match entries.push(key.clone(), entry) {
            // `push` also hands back the old value when the key was already
            // present; that is an overwrite, not an eviction.
            Some((displaced, _)) => displaced != key,
            None => false,
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns how many
    /// entries were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = mutex_lock(&self.entries, "local.invalidate_prefix");
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.as_str().starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, "local.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        mutex_lock(&self.entries, "local.clear").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use palisade_core::PromptSelector;
    use std::time::Duration;

    fn key(name: &str, version: u32) -> CacheKey {
        CacheKey::new(name, &PromptSelector::Version(version))
    }

    fn cache(max: usize) -> LocalCache<String> {
        LocalCache::new(&CacheConfig::new().with_max_local_entries(max))
    }

    fn entry(value: &str, now: Timestamp) -> CacheEntry<String> {
        CacheEntry::new(value.to_string(), now, Duration::from_secs(60), Duration::ZERO)
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let now = Utc::now();
        let cache = cache(10);
        let k = key("greeting", 1);

        assert!(cache.get(&k, now).is_none());
        cache.insert(k.clone(), entry("hello", now));

        let got = cache.get(&k, now).expect("entry present");
        assert_eq!(got.value(), "hello");
    }

    #[test]
    fn test_get_filters_expired_entries() {
        let now = Utc::now();
        let cache = cache(10);
        let k = key("greeting", 1);
        cache.insert(k.clone(), entry("hello", now));

        let later = now + chrono::Duration::seconds(61);
        assert!(cache.get(&k, later).is_none());
        assert!(cache.get_including_expired(&k).is_some());
    }

    #[test]
    fn test_boundary_timestamp_counts_as_expired() {
        let now = Utc::now();
        let cache = cache(10);
        let k = key("greeting", 1);
        let e = entry("hello", now);
        let fresh_until = e.fresh_until();
        cache.insert(k.clone(), e);

        assert!(cache.get(&k, fresh_until).is_none());
    }

    #[test]
    fn test_lru_eviction_order() {
        let now = Utc::now();
        let cache = cache(2);
        let (k1, k2, k3) = (key("a", 1), key("b", 1), key("c", 1));

        assert!(!cache.insert(k1.clone(), entry("1", now)));
        assert!(!cache.insert(k2.clone(), entry("2", now)));
        // Third insert exceeds the bound; k1 is the least recently used.
        assert!(cache.insert(k3.clone(), entry("3", now)));

        assert!(cache.get(&k1, now).is_none());
        assert!(cache.get(&k2, now).is_some());
        assert!(cache.get(&k3, now).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_read_refreshes_recency() {
        let now = Utc::now();
        let cache = cache(2);
        let (k1, k2, k3) = (key("a", 1), key("b", 1), key("c", 1));

        cache.insert(k1.clone(), entry("1", now));
        cache.insert(k2.clone(), entry("2", now));
        // Touch k1 so k2 becomes the eviction candidate.
        assert!(cache.get(&k1, now).is_some());
        cache.insert(k3, entry("3", now));

        assert!(cache.get(&k1, now).is_some());
        assert!(cache.get(&k2, now).is_none());
    }

    #[test]
    fn test_overwrite_is_not_an_eviction() {
        let now = Utc::now();
        let cache = cache(2);
        let k = key("a", 1);

        cache.insert(k.clone(), entry("old", now));
        assert!(!cache.insert(k.clone(), entry("new", now)));
        assert_eq!(cache.get(&k, now).expect("present").value(), "new");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_size_never_exceeds_bound() {
        let now = Utc::now();
        let cache = cache(3);
        for i in 0..50 {
            cache.insert(key("a", i), entry("v", now));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_invalidate_prefix_removes_all_variants_of_a_name() {
        let now = Utc::now();
        let cache = cache(10);
        cache.insert(key("greeting", 1), entry("1", now));
        cache.insert(key("greeting", 2), entry("2", now));
        cache.insert(
            CacheKey::new("greeting", &PromptSelector::Label("staging".into())),
            entry("s", now),
        );
        cache.insert(key("other", 1), entry("o", now));

        let removed = cache.invalidate_prefix(&CacheKey::name_prefix("greeting"));
        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("other", 1), now).is_some());
    }

    #[test]
    fn test_clear() {
        let now = Utc::now();
        let cache = cache(10);
        cache.insert(key("a", 1), entry("1", now));
        cache.insert(key("b", 1), entry("2", now));
        cache.clear();
        assert!(cache.is_empty());
    }
}

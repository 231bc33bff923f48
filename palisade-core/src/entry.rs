//! Cache entries and freshness states.
//!
//! An entry is immutable once created: a refresh produces a brand-new entry,
//! never a mutation in place. Freshness is always computed against a caller
//! supplied `now` so the arithmetic is testable without wall-clock sleeps.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::clock::advance;
use crate::Timestamp;

/// Freshness state of an entry at a point in time.
///
/// Boundaries are strict: an entry whose `fresh_until` equals `now` is
/// already past fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    /// `now < fresh_until`: serve directly, no I/O.
    Fresh,
    /// `fresh_until <= now < stale_until`: serve, refresh in background.
    Revalidate,
    /// Past every window; the entry only exists as eviction fodder.
    Expired,
}

/// A cached value with its freshness windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Timestamp,
    fresh_until: Timestamp,
    /// Absent when stale-while-revalidate is disabled; the entry is then
    /// binary fresh/expired.
    stale_until: Option<Timestamp>,
}

impl<V> CacheEntry<V> {
    /// Build an entry whose windows start at `now`.
    ///
    /// A zero `stale_ttl` disables the revalidate window entirely.
    pub fn new(value: V, now: Timestamp, ttl: Duration, stale_ttl: Duration) -> Self {
        let fresh_until = advance(now, ttl);
        let stale_until = if stale_ttl.is_zero() {
            None
        } else {
            Some(advance(fresh_until, stale_ttl))
        };
        Self {
            value,
            created_at: now,
            fresh_until,
            stale_until,
        }
    }

    /// Compute the freshness state at `now`.
    pub fn state(&self, now: Timestamp) -> FreshnessState {
        if now < self.fresh_until {
            return FreshnessState::Fresh;
        }
        match self.stale_until {
            Some(stale_until) if now < stale_until => FreshnessState::Revalidate,
            _ => FreshnessState::Expired,
        }
    }

    /// True while the entry may be served without any refresh.
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        matches!(self.state(now), FreshnessState::Fresh)
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn fresh_until(&self) -> Timestamp {
        self.fresh_until
    }

    pub fn stale_until(&self) -> Option<Timestamp> {
        self.stale_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base() -> Timestamp {
        Utc::now()
    }

    #[test]
    fn test_fresh_before_ttl_elapses() {
        let now = base();
        let entry = CacheEntry::new("v", now, Duration::from_secs(60), Duration::ZERO);
        assert_eq!(entry.state(now), FreshnessState::Fresh);
        assert!(entry.is_fresh(now));
    }

    #[test]
    fn test_boundary_is_expired_not_fresh() {
        let now = base();
        let entry = CacheEntry::new("v", now, Duration::from_secs(60), Duration::ZERO);
        // Exactly at fresh_until: strict inequality says not fresh.
        assert_eq!(entry.state(entry.fresh_until()), FreshnessState::Expired);
    }

    #[test]
    fn test_boundary_enters_revalidate_when_swr_enabled() {
        let now = base();
        let entry = CacheEntry::new(
            "v",
            now,
            Duration::from_secs(60),
            Duration::from_secs(120),
        );
        assert_eq!(entry.state(entry.fresh_until()), FreshnessState::Revalidate);
    }

    #[test]
    fn test_revalidate_window_ordering_invariant() {
        let now = base();
        let entry = CacheEntry::new(
            "v",
            now,
            Duration::from_secs(60),
            Duration::from_secs(120),
        );
        let stale_until = entry.stale_until().expect("SWR enabled");
        assert!(entry.fresh_until() <= stale_until);
        assert_eq!(entry.state(stale_until), FreshnessState::Expired);
    }

    #[test]
    fn test_zero_stale_ttl_disables_swr() {
        let now = base();
        let entry = CacheEntry::new("v", now, Duration::from_secs(60), Duration::ZERO);
        assert_eq!(entry.stale_until(), None);
        let after = entry.fresh_until() + chrono::Duration::seconds(1);
        assert_eq!(entry.state(after), FreshnessState::Expired);
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_panicking() {
        let now = base();
        let entry = CacheEntry::new("v", now, Duration::MAX, Duration::MAX);
        assert!(entry.is_fresh(now));
    }

    #[test]
    fn test_serde_roundtrip() {
        let now = base();
        let entry = CacheEntry::new(
            "hello".to_string(),
            now,
            Duration::from_secs(60),
            Duration::from_secs(120),
        );
        let bytes = serde_json::to_vec(&entry).expect("encode");
        let decoded: CacheEntry<String> = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(entry, decoded);
    }
}

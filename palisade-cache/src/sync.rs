//! Mutex guard helper that recovers from poisoning.
//!
//! A panic on another thread must not wedge the cache; the guarded state is
//! a cache, so "possibly mid-update" degrades to "possibly stale", which the
//! freshness machinery already handles.

use std::sync::{Mutex, MutexGuard};

use tracing::warn;

pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                result = "poisoned_recovered",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}

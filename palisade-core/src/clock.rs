//! Injectable time source.
//!
//! Freshness arithmetic takes timestamps from a [`Clock`] rather than calling
//! `Utc::now()` inline, so tests can drive time explicitly.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::Timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time. The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Add a std duration to a timestamp, saturating instead of panicking near
/// the far end of representable time.
pub fn advance(ts: Timestamp, by: Duration) -> Timestamp {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| ts.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_saturates() {
        let now = Utc::now();
        assert_eq!(advance(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert!(advance(now, Duration::from_secs(5)) > now);
    }

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}

//! Palisade Core - Shared Vocabulary
//!
//! Pure data types for the Palisade prompt cache: keys, entries, freshness
//! states, configuration, error taxonomy, clock abstraction, and counters.
//! No I/O lives here; the engine is in `palisade-cache`.

use chrono::{DateTime, Utc};

pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod stats;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use clock::{Clock, SystemClock};
pub use config::CacheConfig;
pub use entry::{CacheEntry, FreshnessState};
pub use error::{CacheError, CacheResult, OriginError, StoreError};
pub use key::{CacheKey, PromptSelector, DEFAULT_LABEL};
pub use stats::{CacheStats, StatsSnapshot};

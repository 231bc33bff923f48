//! Palisade Cache - Read-Through Prompt Cache Engine
//!
//! Serves repeated prompt lookups from an in-process TTL+LRU tier, keeps an
//! optional distributed tier coherent enough via TTLs and explicit
//! invalidation, and keeps a herd of processes from stampeding a slow origin:
//!
//! - [`LocalCache`]: the in-process tier; pure data structure, one mutex.
//! - [`DistributedStore`]: the shared-tier seam, with the atomic primitives
//!   locking is built on. [`InMemoryStore`] implements it for tests and
//!   single-node deployments.
//! - [`LockManager`]: short-lived, token-fenced repopulation locks.
//! - [`RefreshScheduler`]: bounded background refresh pool with per-key
//!   deduplication.
//! - [`PromptCache`]: the public entry point; decides FRESH / REVALIDATE /
//!   MISS / STALE per read and routes accordingly.

pub mod local;
pub mod lock;
pub mod orchestrator;
pub mod refresh;
pub mod store;

mod sync;

pub use local::LocalCache;
pub use lock::{DistributedLock, LockManager};
pub use orchestrator::{GetOptions, OriginFetcher, PromptCache};
pub use refresh::RefreshScheduler;
pub use store::{DistributedStore, InMemoryStore};

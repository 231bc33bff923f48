//! Distributed repopulation locks.
//!
//! A lock is one atomic set-if-absent with a TTL and a random fencing token
//! as the value. There is no retry here: contention comes back as
//! `Ok(None)` immediately so the caller can apply its own backoff policy.
//! The TTL guarantees a crashed holder frees the key without anyone's help.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use palisade_core::clock::advance;
use palisade_core::{Clock, StoreError, Timestamp};

use crate::store::DistributedStore;

/// An exclusively held repopulation lock.
///
/// Only [`LockManager::try_acquire`] constructs one, so holding a value of
/// this type is proof the set-if-absent succeeded.
#[derive(Debug)]
pub struct DistributedLock {
    key: String,
    token: Uuid,
    expires_at: Timestamp,
}

impl DistributedLock {
    /// The store key the lock lives under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The fencing token release is conditioned on.
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Whether the store has already reclaimed this lock on its own.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Acquires and releases short-lived mutual-exclusion tokens per key.
pub struct LockManager {
    store: Arc<dyn DistributedStore>,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn DistributedStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Attempt to take the lock, without retrying.
    ///
    /// `Ok(None)` means another holder currently owns it — an expected
    /// outcome, not an error. `Err` means the store itself is unreachable,
    /// which callers must treat as "proceed without protection" rather than
    /// blocking.
    pub async fn try_acquire(
        &self,
        lock_key: &str,
        ttl: Duration,
    ) -> Result<Option<DistributedLock>, StoreError> {
        let token = Uuid::now_v7();
        let acquired = self
            .store
            .set_if_absent(lock_key, token.as_bytes(), ttl)
            .await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(DistributedLock {
            key: lock_key.to_string(),
            token,
            expires_at: advance(self.clock.now(), ttl),
        }))
    }

    /// Release a held lock.
    ///
    /// The delete is conditioned on the fencing token, so releasing a lock
    /// whose TTL already lapsed — and which another process may now hold —
    /// is a no-op. Returns whether the lock entry was actually removed.
    pub async fn release(&self, lock: DistributedLock) -> bool {
        match self
            .store
            .delete_if_equals(&lock.key, lock.token.as_bytes())
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(
                    lock_key = %lock.key,
                    "lock expired or was re-acquired before release"
                );
                false
            }
            Err(error) => {
                tracing::warn!(
                    lock_key = %lock.key,
                    error = %error,
                    "failed to release lock; it will expire on its own"
                );
                false
            }
        }
    }
}

//! Bounded background refresh pool.
//!
//! Stale-while-revalidate reads stay non-blocking because repopulation work
//! goes through this scheduler: a bounded queue feeding a dispatcher that
//! gates worker tasks on a semaphore. Two things bound the damage a refresh
//! storm can do — at most one in-flight refresh per key, and at most
//! `refresh_pool_size` refreshes running at once. Everything over the queue
//! bound is dropped: the stale value being served is still correct, and a
//! later reader will simply trigger another attempt.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};

use palisade_core::{CacheConfig, CacheKey, CacheStats, OriginError};

use crate::sync::mutex_lock;

type RefreshJob = Pin<Box<dyn Future<Output = Result<(), OriginError>> + Send>>;

struct RefreshTask {
    key: CacheKey,
    job: RefreshJob,
}

/// Deduplicating, bounded executor for background repopulation.
pub struct RefreshScheduler {
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
    queue: mpsc::Sender<RefreshTask>,
}

impl RefreshScheduler {
    /// Create a scheduler and spawn its dispatcher.
    ///
    /// Must be called from within a tokio runtime. The dispatcher exits when
    /// the scheduler is dropped; refreshes already running are left to
    /// finish.
    pub fn new(config: &CacheConfig, stats: Arc<CacheStats>) -> Self {
        let (queue, receiver) = mpsc::channel(config.refresh_queue_size.max(1));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let workers = Arc::new(Semaphore::new(config.refresh_pool_size.max(1)));

        tokio::spawn(dispatch(
            receiver,
            workers,
            Arc::clone(&in_flight),
            stats,
            config.refresh_timeout,
        ));

        Self { in_flight, queue }
    }

    /// Hand a refresh job to the pool without waiting for it.
    ///
    /// Returns `false` — with no side effects — when a refresh for `key` is
    /// already in flight, or when the queue is full. Never blocks.
    pub fn submit<F>(&self, key: CacheKey, job: F) -> bool
    where
        F: Future<Output = Result<(), OriginError>> + Send + 'static,
    {
        {
            let mut in_flight = mutex_lock(&self.in_flight, "refresh.submit");
            if !in_flight.insert(key.clone()) {
                return false;
            }
        }

        let task = RefreshTask {
            key: key.clone(),
            job: Box::pin(job),
        };
        match self.queue.try_send(task) {
            Ok(()) => true,
            Err(_) => {
                // Queue saturated (or dispatcher gone): drop the task and
                // roll back the reservation.
                mutex_lock(&self.in_flight, "refresh.submit_rollback").remove(&key);
                tracing::debug!(key = %key, "refresh queue full; dropping refresh");
                false
            }
        }
    }

    /// Whether a refresh for `key` is currently queued or running.
    pub fn is_refreshing(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.in_flight, "refresh.is_refreshing").contains(key)
    }
}

async fn dispatch(
    mut queue: mpsc::Receiver<RefreshTask>,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
    stats: Arc<CacheStats>,
    refresh_timeout: Duration,
) {
    while let Some(task) = queue.recv().await {
        // Waiting for a permit is what bounds concurrency; the queue bound
        // in front of this keeps the wait itself finite.
        let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
            break;
        };
        let in_flight = Arc::clone(&in_flight);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            let _permit = permit;
            let RefreshTask { key, job } = task;
            match tokio::time::timeout(refresh_timeout, job).await {
                Ok(Ok(())) => {
                    stats.record_refresh_success();
                    tracing::debug!(key = %key, "background refresh completed");
                }
                Ok(Err(error)) => {
                    // Swallowed on purpose: the reader that triggered this
                    // already got a value; the entry stays at its last
                    // known state.
                    stats.record_refresh_failure();
                    tracing::warn!(
                        key = %key,
                        error = %error,
                        "background refresh failed; keeping last known value"
                    );
                }
                Err(_) => {
                    stats.record_refresh_failure();
                    tracing::warn!(
                        key = %key,
                        timeout_ms = refresh_timeout.as_millis() as u64,
                        "background refresh timed out; abandoned"
                    );
                }
            }
            mutex_lock(&in_flight, "refresh.finish").remove(&key);
        });
    }
}

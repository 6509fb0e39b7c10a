//! Process-wide concurrency ceiling for pipeline tasks.
//!
//! Backed by tokio's semaphore, which grants permits in FIFO order. A
//! [`Permit`] returns its slot when dropped, so every exit path of a task
//! (success, failure, cancellation) releases it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::metrics;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("concurrency limiter is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct LimiterStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    waiting: AtomicUsize,
}

/// Snapshot of limiter usage.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatus {
    pub max_concurrency: usize,
    pub in_flight: usize,
    pub waiting: usize,
    pub peak: usize,
}

/// Fixed-size permit pool shared by every task in the process.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    stats: Arc<LimiterStats>,
}

/// A granted slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Permit {
    _permit: OwnedSemaphorePermit,
    stats: Arc<LimiterStats>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::PERMITS_IN_FLIGHT.dec();
    }
}

impl ConcurrencyLimiter {
    /// Create a pool of `max_concurrency` permits (at least one).
    pub fn new(max_concurrency: usize) -> Self {
        let max = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            stats: Arc::new(LimiterStats::default()),
        }
    }

    /// Wait for a permit. Waiters are served in request order.
    pub async fn acquire(&self) -> Result<Permit, LimiterError> {
        self.stats.waiting.fetch_add(1, Ordering::SeqCst);
        let acquired = Arc::clone(&self.semaphore).acquire_owned().await;
        self.stats.waiting.fetch_sub(1, Ordering::SeqCst);

        let permit = acquired.map_err(|_| LimiterError::Closed)?;
        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        metrics::PERMITS_IN_FLIGHT.inc();

        Ok(Permit {
            _permit: permit,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Return a permit explicitly. Equivalent to dropping it.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    /// Stop granting permits. Pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held permits seen so far.
    pub fn peak(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            max_concurrency: self.max,
            in_flight: self.in_flight(),
            waiting: self.stats.waiting.load(Ordering::SeqCst),
            peak: self.peak(),
        }
    }
}

use std::time::Duration;

use super::{CallError, CallPolicy};

/// Attempt bookkeeping for a single gateway call.
///
/// Created fresh for every call and never shared, so retries cannot leak
/// across calls or stages.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_retries: u32,
    next_delay: Duration,
}

impl RetryState {
    pub fn new(policy: &CallPolicy) -> Self {
        Self {
            attempt: 1,
            max_retries: policy.max_retries,
            next_delay: policy.delay_for_retry(1),
        }
    }

    /// 1-based number of the attempt currently in progress.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay that will precede the next retry.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// error is not retryable or the budget is spent.
    pub fn on_failure(&mut self, error: &CallError, policy: &CallPolicy) -> Option<Duration> {
        if !error.is_retryable() || self.attempt > self.max_retries {
            return None;
        }
        let delay = self.next_delay;
        self.attempt += 1;
        self.next_delay = policy.delay_for_retry(self.attempt);
        Some(delay)
    }
}

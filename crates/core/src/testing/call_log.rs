//! Call recording shared by the mock services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

/// A recorded service call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Trait method that was called.
    pub method: &'static str,
    /// Main argument (tag, keyword, title...).
    pub argument: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Thread-safe call log that also tracks concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Marks one call as in flight until finished.
pub(crate) struct CallGuard {
    log: CallLog,
    method: &'static str,
    argument: String,
    started: Instant,
}

impl CallLog {
    pub(crate) fn start(&self, method: &'static str, argument: impl Into<String>) -> CallGuard {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        CallGuard {
            log: self.clone(),
            method,
            argument: argument.into(),
            started: Instant::now(),
        }
    }

    /// All calls, in completion order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Calls to one method, in completion order.
    pub async fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub async fn count(&self, method: &str) -> usize {
        self.calls_to(method).await.len()
    }

    /// Highest number of calls that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl CallGuard {
    pub(crate) async fn finish(self) {
        self.log.calls.write().await.push(RecordedCall {
            method: self.method,
            argument: self.argument.clone(),
            started: self.started,
            finished: Instant::now(),
        });
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

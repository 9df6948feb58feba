//! In-flight Operation Tracker
//!
//! Counts datastore operations currently executing so an orchestrator can
//! wait for them to finish before terminating the process.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Concurrency-safe counter of in-flight datastore operations.
///
/// Every `begin()` must be paired with exactly one `end()`. Prefer
/// [`OperationTracker::guard`], which performs the `end()` on drop.
#[derive(Debug, Default)]
pub struct OperationTracker {
    active: AtomicI64,
    drained: Notify,
}

impl OperationTracker {
    /// Create a tracker with no operations in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an operation as started.
    pub fn begin(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark an operation as finished.
    pub fn end(&self) {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 {
            self.drained.notify_waiters();
        } else if prev < 1 {
            tracing::error!(
                "operation tracker went negative ({}): end() without matching begin()",
                prev - 1
            );
        }
    }

    /// Number of operations currently in flight.
    pub fn count(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Begin an operation that ends when the returned guard is dropped.
    pub fn guard(self: &Arc<Self>) -> OperationGuard {
        self.begin();
        OperationGuard {
            tracker: self.clone(),
        }
    }

    /// Wait until no operations are in flight.
    ///
    /// Returns false if the timeout elapsed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drained.notified();
        tokio::pin!(notified);
        // Register before checking so an end() in between is not missed.
        notified.as_mut().enable();

        if self.count() <= 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "drain timeout: {} datastore operations still active",
                    self.count()
                );
                false
            }
        }
    }
}

/// RAII guard for one in-flight operation.
#[derive(Debug)]
pub struct OperationGuard {
    tracker: Arc<OperationTracker>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

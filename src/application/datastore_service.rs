//! Datastore Service
//!
//! Entry point application code uses for every datastore call: the call is
//! counted as in flight for its whole duration and its connection is
//! acquired through the guarded pool.

use crate::domain::ports::ConnectionSource;
use crate::infrastructure::{AcquireError, GuardedPool, OperationTracker, PooledConnection};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single datastore operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors surfaced by [`DatastoreService::execute`].
#[derive(Debug, thiserror::Error)]
pub enum DatastoreError {
    /// No usable connection could be acquired
    #[error(transparent)]
    Unavailable(#[from] AcquireError),
    /// The operation itself failed
    #[error("datastore operation failed: {0}")]
    Operation(#[source] anyhow::Error),
}

impl DatastoreError {
    /// Whether the failure happened before the operation could start.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Application service that guards and tracks datastore operations.
pub struct DatastoreService<S: ConnectionSource> {
    pool: GuardedPool<S>,
    tracker: Arc<OperationTracker>,
    operation_timeout: Duration,
}

impl<S: ConnectionSource> DatastoreService<S> {
    /// Create a new datastore service.
    pub fn new(pool: GuardedPool<S>, tracker: Arc<OperationTracker>) -> Self {
        Self {
            pool,
            tracker,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Bound each operation by `timeout` instead of the default.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// The guarded pool connections come from.
    pub fn pool(&self) -> &GuardedPool<S> {
        &self.pool
    }

    /// The tracker counting operations in flight.
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    /// Run `op` with a validated connection.
    ///
    /// The operation counts as in flight from before acquisition until it
    /// returns, whatever the outcome. An operation that outlives the
    /// operation timeout is abandoned and reported as failed. The
    /// connection goes back to the pool when `op` drops it.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, DatastoreError>
    where
        F: FnOnce(PooledConnection<S>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let _op = self.tracker.guard();
        let conn = self.pool.acquire().await?;
        match tokio::time::timeout(self.operation_timeout, op(conn)).await {
            Ok(result) => result.map_err(DatastoreError::Operation),
            Err(_) => Err(DatastoreError::Operation(anyhow::anyhow!(
                "timed out after {:?}",
                self.operation_timeout
            ))),
        }
    }
}

//! Guarded Connection Pool
//!
//! Wraps an external connection pool so that every acquisition goes through
//! the circuit breaker and a liveness probe before reaching the caller.

use super::circuit_breaker::CircuitBreaker;
use super::connection_validator::ConnectionValidator;
use crate::domain::ports::ConnectionSource;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Reasons a connection could not be handed out.
///
/// Callers normally treat all of them as "datastore unavailable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// Circuit breaker is open; nothing was attempted
    #[error("datastore unavailable: circuit open")]
    CircuitOpen,
    /// Liveness probe failed or timed out
    #[error("datastore unavailable: connection validation failed")]
    ValidationFailed,
    /// The underlying pool had no connection to give
    #[error("datastore unavailable: pool exhausted")]
    PoolExhausted,
}

/// Connection pool gate.
pub struct GuardedPool<S: ConnectionSource> {
    source: Arc<S>,
    validator: ConnectionValidator,
}

impl<S: ConnectionSource> GuardedPool<S> {
    /// Guard `source` with the given validator and its breaker.
    pub fn new(source: Arc<S>, validator: ConnectionValidator) -> Self {
        Self { source, validator }
    }

    /// The breaker consulted on every acquisition.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.validator.breaker()
    }

    /// The underlying pool.
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Acquire a validated connection.
    ///
    /// The connection goes back to the underlying pool when the returned
    /// handle is dropped. A connection that fails validation is pushed back
    /// immediately and never reaches the caller.
    pub async fn acquire(&self) -> Result<PooledConnection<S>, AcquireError> {
        if self.breaker().is_open() {
            tracing::warn!("{} circuit breaker open, failing fast", self.breaker().name());
            return Err(AcquireError::CircuitOpen);
        }

        let mut conn = match self.source.pop().await {
            Some(conn) => conn,
            None => {
                tracing::debug!("{} pool returned no connection", self.breaker().name());
                return Err(AcquireError::PoolExhausted);
            }
        };

        if !self.validator.validate(&mut conn).await {
            self.source.push(conn);
            return Err(AcquireError::ValidationFailed);
        }

        Ok(PooledConnection {
            conn: Some(conn),
            source: self.source.clone(),
        })
    }
}

/// A validated connection borrowed from the underlying pool.
pub struct PooledConnection<S: ConnectionSource> {
    conn: Option<S::Connection>,
    source: Arc<S>,
}

impl<S: ConnectionSource> Deref for PooledConnection<S> {
    type Target = S::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<S: ConnectionSource> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<S: ConnectionSource> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.source.push(conn);
        }
    }
}

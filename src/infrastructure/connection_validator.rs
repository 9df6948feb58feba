//! Connection Validator
//!
//! Bounded-latency liveness probe for pooled datastore connections.

use super::circuit_breaker::CircuitBreaker;
use crate::domain::ports::Pingable;
use std::sync::Arc;
use std::time::Duration;

/// Default probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(20);

/// Pings connections and feeds the outcome into a [`CircuitBreaker`].
#[derive(Clone)]
pub struct ConnectionValidator {
    breaker: Arc<CircuitBreaker>,
    probe_timeout: Duration,
}

impl ConnectionValidator {
    /// Create a validator bound to a breaker.
    pub fn new(breaker: Arc<CircuitBreaker>, probe_timeout: Duration) -> Self {
        Self {
            breaker,
            probe_timeout,
        }
    }

    /// The breaker this validator reports to.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Check that a connection answers within the probe timeout.
    ///
    /// Fails fast without touching the connection while the breaker is
    /// open. Otherwise records exactly one success or failure.
    pub async fn validate<C: Pingable>(&self, conn: &mut C) -> bool {
        if self.breaker.is_open() {
            return false;
        }

        match tokio::time::timeout(self.probe_timeout, conn.ping()).await {
            Ok(Ok(())) => {
                self.breaker.record_success();
                true
            }
            Ok(Err(e)) => {
                self.breaker.record_failure();
                tracing::warn!(
                    "{} connection validation failed: {}",
                    self.breaker.name(),
                    e
                );
                false
            }
            Err(_) => {
                self.breaker.record_failure();
                tracing::warn!(
                    "{} connection validation failed: ping timed out after {:?}",
                    self.breaker.name(),
                    self.probe_timeout
                );
                false
            }
        }
    }
}

//! Status Monitor
//!
//! Background task that reflects the datastore circuit breaker in the
//! service status: open means unhealthy, closed means healthy again.

use crate::infrastructure::{CircuitBreaker, CircuitState, ServiceState, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Apply one breaker observation to the service status.
///
/// Uses the non-consuming breaker peek so the trial request after a
/// cooldown is left for real traffic.
pub fn reconcile(breaker: &CircuitBreaker, state: &ServiceState) {
    match breaker.state() {
        CircuitState::Open => {
            if state.mark_unhealthy() {
                tracing::warn!("{} unavailable, reporting unhealthy", breaker.name());
            }
        }
        CircuitState::Closed => {
            if state.mark_healthy() {
                tracing::info!("{} recovered, reporting healthy", breaker.name());
            }
        }
    }
}

/// Start the monitor; it stops when `shutdown` fires.
pub fn spawn(
    breaker: Arc<CircuitBreaker>,
    state: ServiceState,
    interval: Duration,
    shutdown: ShutdownController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let stopped = shutdown.wait();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = ticker.tick() => reconcile(&breaker, &state),
            }
        }
    })
}

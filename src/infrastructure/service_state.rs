//! Shared Service Status
//!
//! A single atomic cell holding the [`ServiceStatus`] that both listeners
//! read and the drain path writes.

use crate::domain::ServiceStatus;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Cheaply cloneable handle to the process-wide service status.
#[derive(Debug, Clone)]
pub struct ServiceState {
    status: Arc<AtomicU8>,
}

impl ServiceState {
    /// Create a new handle, initially healthy.
    pub fn new() -> Self {
        Self {
            status: Arc::new(AtomicU8::new(ServiceStatus::Healthy.as_u8())),
        }
    }

    /// Current status.
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Whether a drain has been requested.
    pub fn is_draining(&self) -> bool {
        self.status() == ServiceStatus::Draining
    }

    /// Enter the draining state.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn begin_drain(&self) -> bool {
        let prev = self
            .status
            .swap(ServiceStatus::Draining.as_u8(), Ordering::SeqCst);
        let prev = ServiceStatus::from_u8(prev);
        if prev == ServiceStatus::Draining {
            return false;
        }
        tracing::info!("service status changed: {} -> draining", prev);
        true
    }

    /// Report a failing dependency. Ignored while draining.
    pub fn mark_unhealthy(&self) -> bool {
        self.transition(ServiceStatus::Healthy, ServiceStatus::Unhealthy)
    }

    /// Report a recovered dependency. Ignored while draining.
    pub fn mark_healthy(&self) -> bool {
        self.transition(ServiceStatus::Unhealthy, ServiceStatus::Healthy)
    }

    fn transition(&self, from: ServiceStatus, to: ServiceStatus) -> bool {
        let changed = self
            .status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if changed {
            tracing::info!("service status changed: {} -> {}", from, to);
        }
        changed
    }
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

//! Infrastructure Layer
//!
//! Resilience and lifecycle components shared by the adapters.

pub mod circuit_breaker;
pub mod connection_validator;
pub mod guarded_pool;
pub mod operation_tracker;
pub mod service_state;
pub mod shutdown;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitMetrics, CircuitState};
pub use connection_validator::{ConnectionValidator, DEFAULT_PROBE_TIMEOUT};
pub use guarded_pool::{AcquireError, GuardedPool, PooledConnection};
pub use operation_tracker::{OperationGuard, OperationTracker};
pub use service_state::ServiceState;
pub use shutdown::{shutdown_signal, ShutdownController};

//! service-guard Library
//!
//! Lifecycle and resilience layer for a containerized service that depends
//! on a remote datastore: circuit-broken connection acquisition, in-flight
//! operation tracking, a plain-text control socket and an HTTP health
//! endpoint for the orchestrator.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use adapters::inbound::{ControlListener, HealthEndpoint};
pub use adapters::outbound::{RedisConnectionPool, RedisPoolConfig};
pub use application::{DatastoreError, DatastoreService};
pub use config::{load_config, Config};
pub use domain::ports::{ConnectionSource, Pingable};
pub use domain::ServiceStatus;
pub use infrastructure::{
    CircuitBreaker, CircuitBreakerConfig, ConnectionValidator, GuardedPool, OperationTracker,
    ServiceState, ShutdownController,
};

//! Application Layer
//!
//! Services that compose the infrastructure components for callers.

pub mod datastore_service;
pub mod status_monitor;

pub use datastore_service::{DatastoreError, DatastoreService, DEFAULT_OPERATION_TIMEOUT};

//! Domain Layer
//!
//! Core types and outbound ports, free of any transport concerns.

pub mod ports;
pub mod value_objects;

pub use value_objects::ServiceStatus;

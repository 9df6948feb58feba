//! Adapters Layer
//!
//! Inbound adapters expose service state to the orchestrator; outbound
//! adapters implement the datastore ports.

pub mod inbound;
pub mod outbound;

mod connection_source;

pub use connection_source::{ConnectionSource, Pingable};

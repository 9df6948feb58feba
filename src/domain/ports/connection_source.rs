//! Connection Source Port
//!
//! Defines the interface for the externally supplied datastore connection
//! pool. Pool construction and the driver behind it are not our concern;
//! the guard only borrows connections and hands them back.

use async_trait::async_trait;

/// A pooled datastore connection that supports a cheap liveness probe.
#[async_trait]
pub trait Pingable: Send {
    /// Issue a minimal round trip to the datastore.
    ///
    /// Callers bound this with their own timeout; implementations do not
    /// need to enforce one.
    async fn ping(&mut self) -> anyhow::Result<()>;
}

/// An external pool of datastore connections.
///
/// This is an outbound port. Implementations may wrap a driver-provided
/// pool (MongoDB, Redis, ...) or manage raw sockets themselves.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// Connection handle lent out by the pool.
    type Connection: Pingable + 'static;

    /// Take a connection from the pool.
    ///
    /// May wait according to the pool's own policy. Returns `None` when
    /// the pool has nothing to give.
    async fn pop(&self) -> Option<Self::Connection>;

    /// Return a connection to the pool.
    fn push(&self, conn: Self::Connection);
}

//! Redis Connection Pool
//!
//! Maintains persistent RESP connections to a Redis server and exposes them
//! through the [`ConnectionSource`] port. Streams are opened on first ping.

use crate::domain::ports::{ConnectionSource, Pingable};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Notify;

const PING_COMMAND: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    /// Maximum open connections (idle + lent out)
    pub max_connections: usize,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// How long `pop` waits for a connection to be released
    pub wait_timeout: Duration,
    /// Maximum time a connection can be idle
    pub idle_timeout: Duration,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            connect_timeout: Duration::from_secs(1),
            wait_timeout: Duration::from_millis(100),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
        }
    }
}

/// Open-connection accounting shared by a pool and its connections.
#[derive(Debug, Default)]
struct Slots {
    /// Open connections, idle or lent out
    open: AtomicUsize,
    released: Notify,
}

/// Holds one of the pool's connection slots until dropped.
#[derive(Debug)]
struct SlotGuard {
    slots: Arc<Slots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.open.fetch_sub(1, Ordering::SeqCst);
        self.slots.released.notify_one();
    }
}

/// A pooled Redis connection.
///
/// The TCP stream is opened on first use, so an unreachable server shows
/// up as a failed ping. Dropping the connection frees its pool slot.
pub struct RedisConnection {
    addr: Arc<str>,
    connect_timeout: Duration,
    stream: Option<BufStream<TcpStream>>,
    created_at: Instant,
    last_used: Instant,
    /// Set while a request is outstanding; a reply may still be in flight
    desynced: bool,
    _slot: SlotGuard,
}

impl RedisConnection {
    fn new(addr: Arc<str>, connect_timeout: Duration, slot: SlotGuard) -> Self {
        let now = Instant::now();
        Self {
            addr,
            connect_timeout,
            stream: None,
            created_at: now,
            last_used: now,
            desynced: false,
            _slot: slot,
        }
    }

    /// Whether the TCP stream has been opened.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Check if this connection has exceeded its lifetime.
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if this connection has been idle too long.
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    /// Whether an interrupted request left an unread reply on the wire.
    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&*self.addr))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "connect to {} timed out after {:?}",
                    self.addr,
                    self.connect_timeout
                )
            })?
            .map_err(|e| anyhow::anyhow!("connect to {} failed: {}", self.addr, e))?;
        let _ = stream.set_nodelay(true);
        tracing::debug!("opened connection to {}", self.addr);

        self.stream = Some(BufStream::new(stream));
        self.created_at = Instant::now();
        Ok(())
    }
}

#[async_trait]
impl Pingable for RedisConnection {
    async fn ping(&mut self) -> anyhow::Result<()> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        let Some(stream) = self.stream.as_mut() else {
            anyhow::bail!("connection to {} is not open", self.addr);
        };

        self.desynced = true;
        stream.write_all(PING_COMMAND).await?;
        stream.flush().await?;

        let mut reply = String::new();
        let n = stream.read_line(&mut reply).await?;
        if n == 0 {
            anyhow::bail!("connection closed by server");
        }
        self.desynced = false;

        match reply.trim_end() {
            "+PONG" => {
                self.last_used = Instant::now();
                Ok(())
            }
            other => anyhow::bail!("unexpected PING reply: {}", other),
        }
    }
}

/// Pool of Redis connections to a single server.
pub struct RedisConnectionPool {
    addr: Arc<str>,
    config: RedisPoolConfig,
    idle: Mutex<VecDeque<RedisConnection>>,
    slots: Arc<Slots>,
}

impl RedisConnectionPool {
    /// Create an empty pool; connections are opened lazily.
    pub fn new(addr: impl Into<String>, config: RedisPoolConfig) -> Self {
        let addr: String = addr.into();
        Self {
            addr: Arc::from(addr),
            config,
            idle: Mutex::new(VecDeque::new()),
            slots: Arc::new(Slots::default()),
        }
    }

    /// Server address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Pool statistics.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let open = self.slots.open.load(Ordering::SeqCst);
        PoolStats {
            open,
            idle,
            in_use: open.saturating_sub(idle),
        }
    }

    fn take_idle(&self) -> Option<RedisConnection> {
        loop {
            let conn = self.idle.lock().pop_front()?;
            if conn.is_idle_expired(self.config.idle_timeout)
                || conn.is_expired(self.config.max_lifetime)
            {
                tracing::debug!("discarding expired connection to {}", self.addr);
                continue;
            }
            return Some(conn);
        }
    }

    fn try_reserve(&self) -> Option<SlotGuard> {
        self.slots
            .open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
                (open < self.config.max_connections).then_some(open + 1)
            })
            .ok()
            .map(|_| SlotGuard {
                slots: self.slots.clone(),
            })
    }
}

#[async_trait]
impl ConnectionSource for RedisConnectionPool {
    type Connection = RedisConnection;

    async fn pop(&self) -> Option<RedisConnection> {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout;

        loop {
            if let Some(conn) = self.take_idle() {
                return Some(conn);
            }
            if let Some(slot) = self.try_reserve() {
                return Some(RedisConnection::new(
                    self.addr.clone(),
                    self.config.connect_timeout,
                    slot,
                ));
            }

            // Permits from notify_one are stored, so a release between the
            // checks above and this wait is not lost.
            if tokio::time::timeout_at(deadline, self.slots.released.notified())
                .await
                .is_err()
            {
                tracing::debug!("connection pool for {} exhausted", self.addr);
                return None;
            }
        }
    }

    fn push(&self, mut conn: RedisConnection) {
        if conn.is_desynced() || conn.is_expired(self.config.max_lifetime) {
            tracing::debug!("closing connection to {} instead of pooling it", self.addr);
            return;
        }

        conn.last_used = Instant::now();
        self.idle.lock().push_back(conn);
        self.slots.released.notify_one();
    }
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections
    pub open: usize,
    /// Connections waiting in the pool
    pub idle: usize,
    /// Connections currently lent out
    pub in_use: usize,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Fake Redis answering every PING with `reply`.
    async fn fake_redis(reply: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut stream = BufReader::new(stream);
                    let mut buf = [0u8; PING_COMMAND.len()];
                    while stream.read_exact(&mut buf).await.is_ok() {
                        if stream.get_mut().write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        addr
    }

    fn config(max_connections: usize) -> RedisPoolConfig {
        RedisPoolConfig {
            max_connections,
            connect_timeout: Duration::from_millis(200),
            wait_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_config_default() {
        let config = RedisPoolConfig::default();
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.wait_timeout, Duration::from_millis(100));
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_new_pool_is_empty() {
        let pool = RedisConnectionPool::new("127.0.0.1:6379", RedisPoolConfig::default());
        assert_eq!(pool.addr(), "127.0.0.1:6379");
        assert_eq!(
            pool.stats(),
            PoolStats {
                open: 0,
                idle: 0,
                in_use: 0
            }
        );
    }

    #[tokio::test]
    async fn test_pop_opens_connection_and_pings() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = RedisConnectionPool::new(addr.to_string(), config(2));

        let mut conn = pool.pop().await.unwrap();
        conn.ping().await.unwrap();
        assert!(!conn.is_desynced());
        assert_eq!(pool.stats().in_use, 1);

        pool.push(conn);
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test]
    async fn test_pop_reuses_idle_connection() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = RedisConnectionPool::new(addr.to_string(), config(2));

        let conn = pool.pop().await.unwrap();
        pool.push(conn);
        let _conn = pool.pop().await.unwrap();

        assert_eq!(pool.stats().open, 1);
    }

    #[tokio::test]
    async fn test_unexpected_reply_is_error() {
        let addr = fake_redis("-NOAUTH Authentication required.\r\n").await;
        let pool = RedisConnectionPool::new(addr.to_string(), config(1));

        let mut conn = pool.pop().await.unwrap();
        let err = conn.ping().await.unwrap_err();
        assert!(err.to_string().contains("NOAUTH"));
    }

    #[tokio::test]
    async fn test_pop_does_not_connect() {
        let pool = RedisConnectionPool::new("127.0.0.1:1", config(1));

        let conn = pool.pop().await.unwrap();
        assert!(!conn.is_connected());
        assert_eq!(pool.stats().in_use, 1);
    }

    #[tokio::test]
    async fn test_refused_connect_fails_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = RedisConnectionPool::new(addr.to_string(), config(1));
        let mut conn = pool.pop().await.unwrap();

        let err = conn.ping().await.unwrap_err();
        assert!(err.to_string().contains("connect to"), "{}", err);
        assert!(!conn.is_connected());
        assert!(!conn.is_desynced());

        // Never-opened connection is pooled again and retried on next ping
        pool.push(conn);
        assert_eq!(pool.stats().idle, 1);
        assert!(pool.pop().await.is_some());
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = RedisConnectionPool::new(addr.to_string(), config(1));

        let mut conn = pool.pop().await.unwrap();
        conn.ping().await.unwrap();
        drop(conn);

        assert_eq!(pool.stats().open, 0);
        assert!(pool.pop().await.is_some());
    }

    #[tokio::test]
    async fn test_cancelled_ping_frees_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = RedisConnectionPool::new(addr.to_string(), config(2));
        for _ in 0..2 {
            let attempt = tokio::time::timeout(Duration::from_millis(10), async {
                let mut conn = pool.pop().await.unwrap();
                conn.ping().await
            })
            .await;
            assert!(attempt.is_err());
        }

        assert_eq!(
            pool.stats(),
            PoolStats {
                open: 0,
                idle: 0,
                in_use: 0
            }
        );
        assert!(pool.pop().await.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_pool_waits_then_gives_up() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = RedisConnectionPool::new(addr.to_string(), config(1));

        let _held = pool.pop().await.unwrap();

        let started = std::time::Instant::now();
        assert!(pool.pop().await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_exhausted_pool_wakes_on_release() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = std::sync::Arc::new(RedisConnectionPool::new(
            addr.to_string(),
            RedisPoolConfig {
                wait_timeout: Duration::from_secs(2),
                ..config(1)
            },
        ));

        let mut held = pool.pop().await.unwrap();
        held.ping().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.pop().await.is_some() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.push(held);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_desynced_connection_is_not_pooled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept but never answer
        tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let pool = RedisConnectionPool::new(addr.to_string(), config(1));
        let mut conn = pool.pop().await.unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(20), conn.ping()).await;
        assert!(timed_out.is_err());
        assert!(conn.is_desynced());

        pool.push(conn);
        assert_eq!(pool.stats().open, 0);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_expired_idle_connection_is_discarded() {
        let addr = fake_redis("+PONG\r\n").await;
        let pool = RedisConnectionPool::new(
            addr.to_string(),
            RedisPoolConfig {
                idle_timeout: Duration::from_millis(10),
                ..config(1)
            },
        );

        let conn = pool.pop().await.unwrap();
        pool.push(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Stale connection dropped, a fresh one opened in its slot
        let _conn = pool.pop().await.unwrap();
        assert_eq!(pool.stats().open, 1);
        assert_eq!(pool.stats().idle, 0);
    }
}

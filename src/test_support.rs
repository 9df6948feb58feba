//! In-memory connection source for unit tests.

use crate::domain::ports::{ConnectionSource, Pingable};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PingBehavior {
    Ok,
    Fail,
    Hang,
}

#[derive(Debug)]
pub(crate) struct MockConnection {
    pub id: usize,
    pub behavior: PingBehavior,
    pings: Arc<AtomicUsize>,
}

impl MockConnection {
    pub fn new(id: usize, behavior: PingBehavior) -> Self {
        Self {
            id,
            behavior,
            pings: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pingable for MockConnection {
    async fn ping(&mut self) -> anyhow::Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            PingBehavior::Ok => Ok(()),
            PingBehavior::Fail => anyhow::bail!("connection refused"),
            PingBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockSource {
    idle: Mutex<VecDeque<MockConnection>>,
    pings: Arc<AtomicUsize>,
    pops: AtomicUsize,
}

impl MockSource {
    pub fn with(behaviors: &[PingBehavior]) -> Arc<Self> {
        let source = Self::default();
        {
            let mut idle = source.idle.lock();
            for (id, behavior) in behaviors.iter().enumerate() {
                let mut conn = MockConnection::new(id, *behavior);
                conn.pings = source.pings.clone();
                idle.push_back(conn);
            }
        }
        Arc::new(source)
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn pops(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionSource for MockSource {
    type Connection = MockConnection;

    async fn pop(&self) -> Option<MockConnection> {
        self.pops.fetch_add(1, Ordering::SeqCst);
        self.idle.lock().pop_front()
    }

    fn push(&self, conn: MockConnection) {
        self.idle.lock().push_back(conn);
    }
}

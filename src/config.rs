use crate::adapters::outbound::RedisPoolConfig;
use crate::infrastructure::CircuitBreakerConfig;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable pointing at an optional JSON config document.
pub const CONFIG_PATH_ENV: &str = "SERVICE_GUARD_CONFIG";

#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,

    // Orchestrator-facing listeners
    pub control_listen_addr: String,
    pub health_listen_addr: String,
    pub control_read_timeout_ms: u64,

    // Datastore pool
    pub datastore_addr: String,
    pub pool_size: usize,
    pub connect_timeout_ms: u64,
    pub pool_wait_timeout_ms: u64,
    pub pool_idle_timeout_secs: u64,
    pub pool_max_lifetime_ms: u64,
    pub operation_timeout_ms: u64,

    // Resilience
    pub ping_timeout_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_ms: u64,
    pub status_check_interval_ms: u64,

    // Lifecycle
    pub drain_timeout_secs: u64,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            control_listen_addr: "0.0.0.0:8089".to_string(),
            health_listen_addr: "0.0.0.0:8088".to_string(),
            control_read_timeout_ms: 2000,
            datastore_addr: "127.0.0.1:6379".to_string(),
            pool_size: 16,
            connect_timeout_ms: 1000,
            pool_wait_timeout_ms: 100,
            pool_idle_timeout_secs: 300,
            pool_max_lifetime_ms: 3_600_000,
            operation_timeout_ms: 100,
            ping_timeout_ms: 20,
            circuit_failure_threshold: 2,
            circuit_reset_ms: 5000,
            status_check_interval_ms: 1000,
            drain_timeout_secs: 30,
            debug: false,
        }
    }
}

/// JSON document layout, e.g.
///
/// ```json
/// {
///   "service_name": "user-timeline",
///   "control": { "addr": "0.0.0.0", "port": 8089 },
///   "health": { "port": 8088 },
///   "datastore": { "addr": "redis", "port": 6379, "connections": 64, "timeout_ms": 100,
///                  "operation_timeout_ms": 100 },
///   "circuit_breaker": { "failure_threshold": 2, "reset_ms": 5000 }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    service_name: Option<String>,
    debug: Option<bool>,
    drain_timeout_secs: Option<u64>,
    status_check_interval_ms: Option<u64>,
    control: Option<ListenSection>,
    health: Option<ListenSection>,
    datastore: Option<DatastoreSection>,
    circuit_breaker: Option<CircuitSection>,
}

#[derive(Debug, Deserialize)]
struct ListenSection {
    #[serde(default = "default_listen_host")]
    addr: String,
    port: u16,
    read_timeout_ms: Option<u64>,
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Deserialize)]
struct DatastoreSection {
    addr: String,
    port: u16,
    connections: Option<usize>,
    /// How long to wait for a pooled connection
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    /// Maximum connection lifetime
    keepalive_ms: Option<u64>,
    /// Bound on a single datastore operation
    operation_timeout_ms: Option<u64>,
    idle_timeout_secs: Option<u64>,
    ping_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CircuitSection {
    failure_threshold: Option<u32>,
    reset_ms: Option<u64>,
}

impl Config {
    /// Overlay values from a JSON document.
    pub fn apply_json(&mut self, json: &str) -> anyhow::Result<()> {
        let file: FileConfig = serde_json::from_str(json).context("invalid JSON config")?;

        if let Some(v) = file.service_name {
            self.service_name = v;
        }
        if let Some(v) = file.debug {
            self.debug = v;
        }
        if let Some(v) = file.drain_timeout_secs {
            self.drain_timeout_secs = v;
        }
        if let Some(v) = file.status_check_interval_ms {
            self.status_check_interval_ms = v;
        }
        if let Some(control) = file.control {
            self.control_listen_addr = format!("{}:{}", control.addr, control.port);
            if let Some(v) = control.read_timeout_ms {
                self.control_read_timeout_ms = v;
            }
        }
        if let Some(health) = file.health {
            self.health_listen_addr = format!("{}:{}", health.addr, health.port);
        }
        if let Some(ds) = file.datastore {
            self.datastore_addr = format!("{}:{}", ds.addr, ds.port);
            if let Some(v) = ds.connections {
                self.pool_size = v;
            }
            if let Some(v) = ds.timeout_ms {
                self.pool_wait_timeout_ms = v;
            }
            if let Some(v) = ds.connect_timeout_ms {
                self.connect_timeout_ms = v;
            }
            if let Some(v) = ds.keepalive_ms {
                self.pool_max_lifetime_ms = v;
            }
            if let Some(v) = ds.operation_timeout_ms {
                self.operation_timeout_ms = v;
            }
            if let Some(v) = ds.idle_timeout_secs {
                self.pool_idle_timeout_secs = v;
            }
            if let Some(v) = ds.ping_timeout_ms {
                self.ping_timeout_ms = v;
            }
        }
        if let Some(cb) = file.circuit_breaker {
            if let Some(v) = cb.failure_threshold {
                self.circuit_failure_threshold = v;
            }
            if let Some(v) = cb.reset_ms {
                self.circuit_reset_ms = v;
            }
        }
        Ok(())
    }

    /// Overlay values from a JSON file.
    pub fn apply_json_file(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        self.apply_json(&json)
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Overlay `SERVICE_GUARD_*` variables. Unparsable numbers keep the
    /// current value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SERVICE_GUARD_SERVICE_NAME") {
            self.service_name = v;
        }
        if let Some(v) = lookup("SERVICE_GUARD_CONTROL_LISTEN_ADDR") {
            self.control_listen_addr = v;
        }
        if let Some(v) = lookup("SERVICE_GUARD_HEALTH_LISTEN_ADDR") {
            self.health_listen_addr = v;
        }
        if let Some(v) = lookup("SERVICE_GUARD_DATASTORE_ADDR") {
            self.datastore_addr = v;
        }

        parse_into(&lookup, "SERVICE_GUARD_CONTROL_READ_TIMEOUT_MS", &mut self.control_read_timeout_ms);
        parse_into(&lookup, "SERVICE_GUARD_POOL_SIZE", &mut self.pool_size);
        parse_into(&lookup, "SERVICE_GUARD_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms);
        parse_into(&lookup, "SERVICE_GUARD_POOL_WAIT_TIMEOUT_MS", &mut self.pool_wait_timeout_ms);
        parse_into(&lookup, "SERVICE_GUARD_POOL_IDLE_TIMEOUT_SECS", &mut self.pool_idle_timeout_secs);
        parse_into(&lookup, "SERVICE_GUARD_POOL_MAX_LIFETIME_MS", &mut self.pool_max_lifetime_ms);
        parse_into(&lookup, "SERVICE_GUARD_OPERATION_TIMEOUT_MS", &mut self.operation_timeout_ms);
        parse_into(&lookup, "SERVICE_GUARD_PING_TIMEOUT_MS", &mut self.ping_timeout_ms);
        parse_into(&lookup, "SERVICE_GUARD_CIRCUIT_FAILURE_THRESHOLD", &mut self.circuit_failure_threshold);
        parse_into(&lookup, "SERVICE_GUARD_CIRCUIT_RESET_MS", &mut self.circuit_reset_ms);
        parse_into(&lookup, "SERVICE_GUARD_STATUS_CHECK_INTERVAL_MS", &mut self.status_check_interval_ms);
        parse_into(&lookup, "SERVICE_GUARD_DRAIN_TIMEOUT_SECS", &mut self.drain_timeout_secs);

        if lookup("DEBUG").is_some() {
            self.debug = true;
        }
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool_size == 0 {
            anyhow::bail!("pool_size must be at least 1");
        }
        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be at least 1");
        }
        if self.status_check_interval_ms == 0 {
            anyhow::bail!("status_check_interval_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_failure_threshold,
            reset_timeout: Duration::from_millis(self.circuit_reset_ms),
        }
    }

    pub fn pool_config(&self) -> RedisPoolConfig {
        RedisPoolConfig {
            max_connections: self.pool_size,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            wait_timeout: Duration::from_millis(self.pool_wait_timeout_ms),
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            max_lifetime: Duration::from_millis(self.pool_max_lifetime_ms),
        }
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn control_read_timeout(&self) -> Duration {
        Duration::from_millis(self.control_read_timeout_ms)
    }

    pub fn status_check_interval(&self) -> Duration {
        Duration::from_millis(self.status_check_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("ignoring unparsable {}={:?}", key, raw),
        }
    }
}

/// Load configuration: defaults, then the JSON document named by
/// `SERVICE_GUARD_CONFIG`, then environment variables.
pub fn load_config() -> anyhow::Result<Config> {
    let mut cfg = Config::default();

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        cfg.apply_json_file(&path)?;
    }
    cfg.apply_env(|key| std::env::var(key).ok());
    cfg.validate()?;

    Ok(cfg)
}

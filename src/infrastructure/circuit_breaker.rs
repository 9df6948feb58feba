//! Circuit Breaker Pattern
//!
//! Stops issuing operations to a datastore after consecutive failures and
//! lets a single trial request through once the cooldown has elapsed.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to keep circuit open before allowing a trial request
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(5000),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    #[default]
    Closed,
    /// Circuit tripped - requests fail fast
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Circuit breaker for a single guarded resource.
///
/// The failure counter is lock-free. The open flag and reset deadline only
/// change while `reset_deadline` is locked, so exactly one caller performs
/// the reset when the cooldown expires.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    failures: AtomicU32,
    open: AtomicBool,
    reset_deadline: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker for the named resource.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
            reset_deadline: Mutex::new(None),
        }
    }

    /// Name of the guarded resource.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check whether requests must fail fast.
    ///
    /// Once the cooldown has passed, the first caller resets the breaker to
    /// closed and gets `false` back as the trial request.
    pub fn is_open(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }

        let mut deadline = self.reset_deadline.lock();
        // Another caller may have performed the reset while we waited.
        if !self.open.load(Ordering::Acquire) {
            return false;
        }

        match *deadline {
            Some(at) if Instant::now() < at => true,
            _ => {
                *deadline = None;
                self.failures.store(0, Ordering::Release);
                self.open.store(false, Ordering::Release);
                tracing::info!(
                    "circuit breaker for {} reset after cooldown, allowing trial request",
                    self.name
                );
                false
            }
        }
    }

    /// Record a successful request.
    ///
    /// Clears the failure count; an open circuit stays open until its
    /// deadline expires.
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if failures < self.config.failure_threshold {
            return;
        }

        let mut deadline = self.reset_deadline.lock();
        *deadline = Some(Instant::now() + self.config.reset_timeout);
        if !self.open.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "circuit breaker for {} opened after {} consecutive failures",
                self.name,
                failures
            );
        }
    }

    /// Current state, without triggering the cooldown reset.
    pub fn state(&self) -> CircuitState {
        if self.open.load(Ordering::Acquire) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Snapshot of the breaker counters.
    pub fn metrics(&self) -> CircuitMetrics {
        CircuitMetrics {
            state: self.state(),
            failures: self.failures.load(Ordering::Acquire),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("datastore", CircuitBreakerConfig::default())
    }
}

/// Metrics for a circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub failures: u32,
}

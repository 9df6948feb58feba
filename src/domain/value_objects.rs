//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

/// Process-wide service status reported to the orchestrator.
///
/// `Healthy -> Draining` is one-directional: once a drain has been
/// requested the service never reports healthy again. `Unhealthy`
/// reflects dependency failures and may be entered and left freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// Accepting work
    Healthy,
    /// Drain requested - no new work, in-flight work finishing
    Draining,
    /// A dependency is failing
    Unhealthy,
}

impl ServiceStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Draining => "draining",
            Self::Unhealthy => "unhealthy",
        }
    }

    /// Whether readiness probes should route traffic to this instance.
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Draining => 1,
            Self::Unhealthy => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Healthy,
            1 => Self::Draining,
            _ => Self::Unhealthy,
        }
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::Healthy
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

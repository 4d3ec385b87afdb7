//! # Health projections of a supervised service.
//!
//! Two read-only views over [`SupervisorState`] for external probes:
//!
//! | state       | readiness   | liveness    |
//! |-------------|-------------|-------------|
//! | NotStarted  | Unhealthy   | Unhealthy   |
//! | Starting    | Unhealthy   | Healthy     |
//! | Running     | Healthy     | Healthy     |
//! | Stopping    | Degraded    | Degraded    |
//! | Stopped     | Degraded    | Unhealthy   |
//! | Crashed     | Unhealthy + cause | Unhealthy + cause |

use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a supervised service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// `start` not called yet.
    NotStarted,
    /// `start` in progress.
    Starting,
    /// Started, consumer loop running.
    Running,
    /// Graceful stop in progress.
    Stopping,
    /// Stopped; may not be restarted.
    Stopped,
    /// Consumer loop failed; terminal.
    Crashed,
}

impl SupervisorState {
    /// Short stable label (snake_case).
    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorState::NotStarted => "not_started",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Stopping => "stopping",
            SupervisorState::Stopped => "stopped",
            SupervisorState::Crashed => "crashed",
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status tag of a health report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but winding down.
    Degraded,
    /// Not operational.
    Unhealthy,
}

/// Result of a readiness or liveness probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// Status tag.
    pub status: HealthStatus,
    /// Human-readable reason.
    pub reason: &'static str,
    /// Captured crash cause, verbatim, when the service crashed.
    pub cause: Option<Arc<str>>,
}

impl HealthReport {
    fn new(status: HealthStatus, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            cause: None,
        }
    }

    fn crashed(cause: Option<Arc<str>>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            reason: "service crashed",
            cause,
        }
    }

    /// True for [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Ready = started and not crashed.
pub(crate) fn readiness(state: SupervisorState, cause: Option<Arc<str>>) -> HealthReport {
    use HealthStatus::*;
    match state {
        SupervisorState::NotStarted => HealthReport::new(Unhealthy, "service not started"),
        SupervisorState::Starting => HealthReport::new(Unhealthy, "service starting"),
        SupervisorState::Running => HealthReport::new(Healthy, "service running"),
        SupervisorState::Stopping => HealthReport::new(Degraded, "service stopping"),
        SupervisorState::Stopped => HealthReport::new(Degraded, "service stopped"),
        SupervisorState::Crashed => HealthReport::crashed(cause),
    }
}

/// Live = starting or running and not crashed.
pub(crate) fn liveness(state: SupervisorState, cause: Option<Arc<str>>) -> HealthReport {
    use HealthStatus::*;
    match state {
        SupervisorState::NotStarted => HealthReport::new(Unhealthy, "service not started"),
        SupervisorState::Starting => HealthReport::new(Healthy, "service starting"),
        SupervisorState::Running => HealthReport::new(Healthy, "service running"),
        SupervisorState::Stopping => HealthReport::new(Degraded, "service stopping"),
        SupervisorState::Stopped => HealthReport::new(Unhealthy, "service stopped"),
        SupervisorState::Crashed => HealthReport::crashed(cause),
    }
}

//! Status enums for Runs and their outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Run in the tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run accepted but not yet picked up by the executor.
    #[default]
    Queued,
    /// External process is executing.
    Running,
    /// All selected tests passed.
    Passed,
    /// The framework reported test failures.
    Failed,
    /// Deadline exceeded and the process was reaped.
    Timeout,
    /// Spawn failure, framework-internal fault or cancellation.
    Error,
}

impl RunStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [RunStatus; 6] = [
        Self::Queued,
        Self::Running,
        Self::Passed,
        Self::Failed,
        Self::Timeout,
        Self::Error,
    ];

    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Timeout | Self::Error
        )
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            Self::Queued => next == Self::Running || next.is_terminal(),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }

    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a single test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Timeout,
    Error,
}

impl From<OutcomeStatus> for RunStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Passed => RunStatus::Passed,
            OutcomeStatus::Failed => RunStatus::Failed,
            OutcomeStatus::Timeout => RunStatus::Timeout,
            OutcomeStatus::Error => RunStatus::Error,
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RunStatus::from(*self).fmt(f)
    }
}

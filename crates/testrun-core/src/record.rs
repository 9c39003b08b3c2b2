//! Run records, outcomes and the transitions that move them forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::RunId;
use crate::request::TestRunRequest;
use crate::status::{OutcomeStatus, RunStatus};

/// Text captured from a process's standard streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether stdout hit the capture limit.
    pub stdout_truncated: bool,
    /// Whether stderr hit the capture limit.
    pub stderr_truncated: bool,
}

impl CapturedOutput {
    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }
}

/// Client-facing result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub status: OutcomeStatus,
    /// Human-readable summary.
    pub message: String,
    /// Wall-clock seconds, never negative.
    pub duration: f64,
    /// Screenshot references in capture order.
    pub screenshots: Vec<String>,
    pub report_url: Option<String>,
}

impl TestOutcome {
    /// Outcome for an item that never ran.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            duration: 0.0,
            screenshots: Vec::new(),
            report_url: None,
        }
    }
}

/// Terminal fields applied atomically with the terminal status.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub status: OutcomeStatus,
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub error: Option<String>,
    pub message: String,
    pub screenshots: Vec<String>,
    pub report_url: Option<String>,
}

impl RunCompletion {
    pub fn new(status: OutcomeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            exit_code: None,
            output: CapturedOutput::default(),
            error: None,
            message: message.into(),
            screenshots: Vec::new(),
            report_url: None,
        }
    }

    /// Completion for a run that failed before or outside the test process.
    pub fn error(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            error: Some(error.clone()),
            ..Self::new(OutcomeStatus::Error, error)
        }
    }
}

/// A forward step in a run's lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum RunTransition {
    /// The executor accepted the run.
    Start,
    /// The run reached a terminal state.
    Finish(RunCompletion),
}

impl RunTransition {
    pub fn target(&self) -> RunStatus {
        match self {
            Self::Start => RunStatus::Running,
            Self::Finish(completion) => completion.status.into(),
        }
    }
}

/// The tracker's record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub request: TestRunRequest,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    /// When the executor accepted the run.
    pub started_at: Option<DateTime<Utc>>,
    /// Present iff the status is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub error: Option<String>,
    pub outcome: Option<TestOutcome>,
}

impl RunRecord {
    /// Create a new queued record.
    pub fn new(id: RunId, request: TestRunRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            status: RunStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
            exit_code: None,
            output: CapturedOutput::default(),
            error: None,
            outcome: None,
        }
    }

    /// Apply a transition, rejecting anything that is not a forward move.
    pub fn apply(
        &mut self,
        transition: RunTransition,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let next = transition.target();
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        match transition {
            RunTransition::Start => {
                self.status = RunStatus::Running;
                self.started_at = Some(now);
            }
            RunTransition::Finish(completion) => {
                let status = completion.status;
                self.status = status.into();
                self.completed_at = Some(now);
                self.exit_code = completion.exit_code;
                self.output = completion.output;
                self.error = completion.error;
                self.outcome = Some(TestOutcome {
                    status,
                    message: completion.message,
                    duration: self.duration_secs(now),
                    screenshots: completion.screenshots,
                    report_url: completion.report_url,
                });
            }
        }
        Ok(())
    }

    /// Seconds between start (or creation, if never started) and completion.
    ///
    /// For an active run this is the time elapsed so far relative to `now`.
    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        let millis = (end - start).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

//! Supported test frameworks and their per-framework invocation settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::status::OutcomeStatus;

/// External test framework a run is delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Robot Framework acceptance runner.
    Robot,
    /// Playwright browser runner.
    Playwright,
    /// pytest general-purpose runner.
    Pytest,
}

impl Framework {
    pub const ALL: [Framework; 3] = [Self::Robot, Self::Playwright, Self::Pytest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Robot => "robot",
            Self::Playwright => "playwright",
            Self::Pytest => "pytest",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robot" | "robotframework" => Ok(Self::Robot),
            "playwright" => Ok(Self::Playwright),
            "pytest" => Ok(Self::Pytest),
            _ => Err(ValidationError::UnknownFramework(s.to_string())),
        }
    }
}

/// How a framework's exit code maps onto an outcome.
///
/// `passed` means every selected test passed. Codes inside
/// `failure_min..=failure_max` are ordinary test failures. Anything else is a
/// framework-internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCodePolicy {
    pub passed: i32,
    pub failure_min: i32,
    pub failure_max: i32,
}

impl ExitCodePolicy {
    /// Zero passes, any positive code is a failure.
    pub const fn zero_or_failure() -> Self {
        Self {
            passed: 0,
            failure_min: 1,
            failure_max: i32::MAX,
        }
    }

    /// Robot Framework: 1-250 counts failed tests, 251 and above are
    /// runner errors (help shown, bad data, interrupted, internal error).
    pub const fn robot() -> Self {
        Self {
            passed: 0,
            failure_min: 1,
            failure_max: 250,
        }
    }

    pub fn for_framework(framework: Framework) -> Self {
        match framework {
            Framework::Robot => Self::robot(),
            Framework::Playwright | Framework::Pytest => Self::zero_or_failure(),
        }
    }

    /// Interpret an exit code. Timeouts are handled before this is consulted.
    pub fn interpret(&self, code: i32) -> OutcomeStatus {
        if code == self.passed {
            OutcomeStatus::Passed
        } else if (self.failure_min..=self.failure_max).contains(&code) {
            OutcomeStatus::Failed
        } else {
            OutcomeStatus::Error
        }
    }
}

impl Default for ExitCodePolicy {
    fn default() -> Self {
        Self::zero_or_failure()
    }
}

/// Per-framework invocation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSettings {
    /// Program followed by its leading arguments, e.g. `["npx", "playwright", "test"]`.
    pub launcher: Vec<String>,

    /// Working directory for the process. Inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Test location used when the request carries no path.
    #[serde(default)]
    pub default_path: Option<String>,

    /// Subdirectory of the artifact root the runner writes into.
    #[serde(default)]
    pub output_subdir: Option<String>,

    /// Report file name inside the output directory.
    #[serde(default)]
    pub report_file: Option<String>,

    #[serde(default)]
    pub exit_codes: ExitCodePolicy,
}

impl FrameworkSettings {
    pub fn robot() -> Self {
        Self {
            launcher: vec!["robot".to_string()],
            working_dir: None,
            default_path: Some("tests/".to_string()),
            output_subdir: Some("robot".to_string()),
            report_file: Some("report.html".to_string()),
            exit_codes: ExitCodePolicy::robot(),
        }
    }

    pub fn playwright() -> Self {
        Self {
            launcher: vec![
                "npx".to_string(),
                "playwright".to_string(),
                "test".to_string(),
            ],
            working_dir: None,
            default_path: None,
            output_subdir: Some("playwright".to_string()),
            report_file: None,
            exit_codes: ExitCodePolicy::zero_or_failure(),
        }
    }

    pub fn pytest() -> Self {
        Self {
            launcher: vec!["pytest".to_string()],
            working_dir: None,
            default_path: None,
            output_subdir: None,
            report_file: None,
            exit_codes: ExitCodePolicy::zero_or_failure(),
        }
    }

    pub fn for_framework(framework: Framework) -> Self {
        match framework {
            Framework::Robot => Self::robot(),
            Framework::Playwright => Self::playwright(),
            Framework::Pytest => Self::pytest(),
        }
    }

    /// Builder method to replace the launcher.
    pub fn with_launcher<I, S>(mut self, launcher: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the exit-code policy.
    pub fn with_exit_codes(mut self, policy: ExitCodePolicy) -> Self {
        self.exit_codes = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_framework() {
        assert_eq!("Robot".parse::<Framework>().unwrap(), Framework::Robot);
        assert_eq!("playwright".parse::<Framework>().unwrap(), Framework::Playwright);
        assert_eq!(" pytest ".parse::<Framework>().unwrap(), Framework::Pytest);
        assert_eq!(
            "jest".parse::<Framework>(),
            Err(ValidationError::UnknownFramework("jest".to_string()))
        );
    }

    #[test]
    fn test_robot_policy_ranges() {
        let policy = ExitCodePolicy::robot();
        assert_eq!(policy.interpret(0), OutcomeStatus::Passed);
        assert_eq!(policy.interpret(3), OutcomeStatus::Failed);
        assert_eq!(policy.interpret(250), OutcomeStatus::Failed);
        assert_eq!(policy.interpret(251), OutcomeStatus::Error);
        assert_eq!(policy.interpret(255), OutcomeStatus::Error);
        assert_eq!(policy.interpret(-1), OutcomeStatus::Error);
    }

    #[test]
    fn test_zero_or_failure_policy() {
        let policy = ExitCodePolicy::zero_or_failure();
        assert_eq!(policy.interpret(0), OutcomeStatus::Passed);
        assert_eq!(policy.interpret(1), OutcomeStatus::Failed);
        assert_eq!(policy.interpret(127), OutcomeStatus::Failed);
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: FrameworkSettings =
            serde_json::from_str(r#"{"launcher": ["python", "-m", "pytest"]}"#).unwrap();
        assert_eq!(settings.launcher, vec!["python", "-m", "pytest"]);
        assert!(settings.output_subdir.is_none());
        assert_eq!(settings.exit_codes, ExitCodePolicy::zero_or_failure());
    }
}

//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use testrun_core::{Framework, FrameworkSettings};

use crate::error::ConfigError;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum simultaneously running external processes.
    pub max_concurrent_runs: usize,

    /// Deadline applied when a request does not set one (seconds).
    pub default_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL (milliseconds).
    pub kill_grace_ms: u64,

    /// Capture limit per output stream (bytes).
    pub max_output_bytes: usize,

    /// Root directory runners write reports and screenshots into.
    pub artifact_root: PathBuf,

    /// Buffered run updates per subscriber before it starts lagging.
    pub update_channel_capacity: usize,

    pub frameworks: FrameworkTable,
}

impl OrchestratorConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        config.resolve_artifact_root()?;
        Ok(config)
    }

    /// Anchor a relative `artifact_root` at the current directory, so runners
    /// started in another working directory write where artifacts are read.
    pub fn resolve_artifact_root(&mut self) -> std::io::Result<()> {
        if self.artifact_root.is_relative() {
            self.artifact_root = std::env::current_dir()?.join(&self.artifact_root);
        }
        Ok(())
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_runs must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.update_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "update_channel_capacity must be at least 1".to_string(),
            ));
        }
        for framework in Framework::ALL {
            if self.frameworks.get(framework).launcher.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "launcher for {} is empty",
                    framework
                )));
            }
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            default_timeout_secs: 300,
            kill_grace_ms: 5_000,
            max_output_bytes: testrun_process::DEFAULT_MAX_OUTPUT_BYTES,
            artifact_root: PathBuf::from("./evidence"),
            update_channel_capacity: 256,
            frameworks: FrameworkTable::default(),
        }
    }
}

/// Settings for every supported framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkTable {
    #[serde(default = "FrameworkSettings::robot")]
    pub robot: FrameworkSettings,

    #[serde(default = "FrameworkSettings::playwright")]
    pub playwright: FrameworkSettings,

    #[serde(default = "FrameworkSettings::pytest")]
    pub pytest: FrameworkSettings,
}

impl FrameworkTable {
    pub fn get(&self, framework: Framework) -> &FrameworkSettings {
        match framework {
            Framework::Robot => &self.robot,
            Framework::Playwright => &self.playwright,
            Framework::Pytest => &self.pytest,
        }
    }

    pub fn set(&mut self, framework: Framework, settings: FrameworkSettings) {
        match framework {
            Framework::Robot => self.robot = settings,
            Framework::Playwright => self.playwright = settings,
            Framework::Pytest => self.pytest = settings,
        }
    }
}

impl Default for FrameworkTable {
    fn default() -> Self {
        Self {
            robot: FrameworkSettings::robot(),
            playwright: FrameworkSettings::playwright(),
            pytest: FrameworkSettings::pytest(),
        }
    }
}

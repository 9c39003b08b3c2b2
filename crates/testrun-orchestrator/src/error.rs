//! Orchestrator errors.

use testrun_core::{CoreError, RunId, ValidationError};
use thiserror::Error;

/// Synchronous submission failures. No run is recorded when these occur.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// The framework's settings could not produce a command.
    #[error("Cannot build command: {0}")]
    Command(#[from] CoreError),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

/// Run tracker errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Run not found: {0}")]
    NotFound(RunId),

    /// A transition that would break lifecycle monotonicity.
    #[error("Run {id}: {source}")]
    InvalidTransition {
        id: RunId,
        #[source]
        source: CoreError,
    },
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

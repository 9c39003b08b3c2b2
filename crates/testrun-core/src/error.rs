//! Core domain errors.

use thiserror::Error;

/// Core domain errors for TestRun.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Reasons a submitted request is rejected before a run is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Framework name did not match any known runner.
    #[error("Unknown framework: {0}")]
    UnknownFramework(String),

    /// Test identifier was empty or whitespace.
    #[error("Test identifier must not be empty")]
    EmptyTestIdentifier,

    /// A tag was empty or whitespace.
    #[error("Tag at position {index} is empty")]
    EmptyTag { index: usize },

    /// Per-request timeout of zero seconds.
    #[error("Timeout must be greater than zero seconds")]
    ZeroTimeout,
}

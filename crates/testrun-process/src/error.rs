//! Error types for the process executor.

use thiserror::Error;

/// Errors that prevent a process from producing an exit status.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Executable not found.
    #[error("Executable '{0}' not found")]
    NotFound(String),

    /// Executable exists but may not be run.
    #[error("Permission denied launching '{0}'")]
    PermissionDenied(String),

    /// Any other spawn failure.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child failed.
    #[error("Failed to wait for process: {0}")]
    Wait(#[from] std::io::Error),
}

impl ExecError {
    pub(crate) fn from_spawn(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Spawn {
                program: program.to_string(),
                source: err,
            },
        }
    }
}

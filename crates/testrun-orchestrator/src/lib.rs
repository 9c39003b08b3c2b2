//! TestRun Orchestrator Library
//!
//! This crate wires the run pipeline together: requests are validated and
//! turned into commands, executed in the background under a bounded worker
//! pool, classified, and recorded in a concurrency-safe run tracker that
//! serves status polling. Batches fan out through the same pipeline and fan
//! back in by input position.

pub mod artifacts;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod state;

#[cfg(test)]
mod testing;

pub use config::{FrameworkTable, OrchestratorConfig};
pub use dispatcher::{BatchItem, BatchMode, BatchOptions, BatchProgress, BatchResult};
pub use error::{ConfigError, SubmitError, TrackerError};
pub use metrics::RunStats;
pub use orchestrator::Orchestrator;
pub use state::{RunTracker, RunUpdate};

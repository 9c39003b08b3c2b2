//! TestRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Process spawning
//! - Async runtime specifics
//! - Transport/serialization layers beyond serde derives
//!
//! It also hosts the pure stages of the run pipeline: request validation,
//! command construction and result classification.

pub mod classify;
pub mod command;
pub mod error;
pub mod framework;
pub mod ids;
pub mod record;
pub mod request;
pub mod status;

// Re-export commonly used types
pub use classify::{classify, outcome_message};
pub use command::{build_command, CommandPlan, CommandSpec};
pub use error::{CoreError, ValidationError};
pub use framework::{ExitCodePolicy, Framework, FrameworkSettings};
pub use ids::RunId;
pub use record::{CapturedOutput, RunCompletion, RunRecord, RunTransition, TestOutcome};
pub use request::{Priority, TestRunRequest, ValidRequest};
pub use status::{OutcomeStatus, RunStatus};

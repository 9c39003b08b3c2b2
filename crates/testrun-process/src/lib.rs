//! Process executor for TestRun
//!
//! This crate runs one external test-framework process per call. It owns the
//! whole process lifecycle: spawning without a shell, capturing stdout and
//! stderr into bounded buffers, enforcing a wall-clock deadline, honouring
//! cancellation, and terminating the process together with every descendant
//! in its process group.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use testrun_core::CommandSpec;
//! use testrun_process::{CommandRunner, ProcessExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = ProcessExecutor::new().with_kill_grace(Duration::from_secs(2));
//!     let command = CommandSpec::new("pytest").args(["-k", "test_login"]);
//!
//!     let output = executor
//!         .run(&command, Duration::from_secs(60), CancellationToken::new())
//!         .await?;
//!
//!     println!("exit code: {:?}, timed out: {}", output.exit_code, output.timed_out);
//!     Ok(())
//! }
//! ```

mod capture;
mod error;
mod executor;
mod group;
mod runner;

pub use capture::{truncation_marker, ABANDONED_MARKER};
pub use error::ExecError;
pub use executor::{ProcessExecutor, ProcessOutput, DEFAULT_KILL_GRACE, DEFAULT_MAX_OUTPUT_BYTES};
pub use runner::CommandRunner;

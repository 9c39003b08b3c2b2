//! The seam between the orchestrator and process execution.

use std::time::Duration;

use async_trait::async_trait;
use testrun_core::CommandSpec;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::executor::ProcessOutput;

/// Something that can execute a command under a deadline.
///
/// Implementations must guarantee that when `run` returns, the process and
/// all of its descendants are gone, whether it exited, timed out or was
/// cancelled through `cancel`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &CommandSpec,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ExecError>;
}

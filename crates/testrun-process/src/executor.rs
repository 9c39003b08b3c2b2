//! Deadline-bounded execution of one external process.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use testrun_core::{CapturedOutput, CommandSpec};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{capture, Captured};
use crate::error::ExecError;
use crate::group::ProcessGroup;
use crate::runner::CommandRunner;

/// Per-stream capture limit.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Time a process gets between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// What a finished process left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Exit code. `None` when the process was timed out, cancelled or killed
    /// by a signal.
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Executor for external test processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Capture limit per stream, in bytes.
    max_output_bytes: usize,

    /// Grace period between SIGTERM and SIGKILL.
    kill_grace: Duration,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Set the per-stream capture limit.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the SIGTERM-to-SIGKILL grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    /// Run `command` until it exits, `deadline` elapses or `cancel` fires.
    ///
    /// On every path the process group is killed before this returns, so
    /// no descendant outlives the call. Dropping the returned future has the
    /// same effect.
    pub async fn execute(
        &self,
        command: &CommandSpec,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ExecError> {
        let started = Instant::now();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        info!(
            program = %command.program,
            deadline_secs = deadline.as_secs_f64(),
            "Spawning test process"
        );
        debug!(command = %command, "Full command");

        let mut child = cmd.spawn().map_err(|e| {
            error!(program = %command.program, error = %e, "Failed to spawn test process");
            ExecError::from_spawn(&command.program, e)
        })?;

        let group = ProcessGroup::new(child.id());
        let limit = self.max_output_bytes;
        let stop_capture = CancellationToken::new();
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(capture(out, limit, stop_capture.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(capture(err, limit, stop_capture.clone())));

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(deadline) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        let (status, timed_out, cancelled) = match ending {
            Ending::Exited(status) => (status, false, false),
            Ending::TimedOut => {
                warn!(
                    program = %command.program,
                    deadline_secs = deadline.as_secs_f64(),
                    "Deadline exceeded, terminating process group"
                );
                (self.terminate(&mut child, &group).await, true, false)
            }
            Ending::Cancelled => {
                info!(program = %command.program, "Run cancelled, terminating process group");
                (self.terminate(&mut child, &group).await, false, true)
            }
        };

        // Reap descendants that outlived the leader so inherited pipes close.
        group.kill();

        let stdout = self.collect(stdout_task, &stop_capture).await;
        let stderr = self.collect(stderr_task, &stop_capture).await;
        let status = status?;

        let exit_code = if timed_out || cancelled {
            None
        } else {
            status.code()
        };
        let elapsed = started.elapsed();

        info!(
            program = %command.program,
            exit_code = ?exit_code,
            timed_out,
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Test process finished"
        );

        Ok(ProcessOutput {
            exit_code,
            output: CapturedOutput {
                stdout: stdout.text,
                stderr: stderr.text,
                stdout_truncated: stdout.truncated,
                stderr_truncated: stderr.truncated,
            },
            timed_out,
            cancelled,
            elapsed,
        })
    }

    /// SIGTERM the group, then SIGKILL it if the leader outlives the grace period.
    async fn terminate(
        &self,
        child: &mut Child,
        group: &ProcessGroup,
    ) -> std::io::Result<ExitStatus> {
        group.terminate();
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    grace_ms = self.kill_grace.as_millis() as u64,
                    "Process ignored termination, killing process group"
                );
                group.kill();
                let _ = child.start_kill();
                child.wait().await
            }
        }
    }

    /// Join a capture task. If the stream stays open past the grace period
    /// (a descendant escaped the group and holds the pipe), stop capturing and
    /// keep what was read.
    async fn collect(
        &self,
        task: Option<JoinHandle<Captured>>,
        stop: &CancellationToken,
    ) -> Captured {
        let Some(mut task) = task else {
            return Captured::default();
        };

        let joined = match tokio::time::timeout(self.kill_grace, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Output stream still open after process exit, stopping capture");
                stop.cancel();
                task.await
            }
        };

        joined.unwrap_or_else(|e| {
            warn!(error = %e, "Output capture task failed");
            Captured::default()
        })
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(
        &self,
        command: &CommandSpec,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ExecError> {
        self.execute(command, deadline, &cancel).await
    }
}

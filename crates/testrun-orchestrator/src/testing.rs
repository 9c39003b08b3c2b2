//! A scripted command runner for exercising the orchestrator without
//! spawning processes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use testrun_core::{CapturedOutput, CommandSpec};
use testrun_process::{CommandRunner, ExecError, ProcessOutput};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
enum Script {
    Exit { delay: Duration, code: i32 },
    SpawnFailure,
}

/// Runner whose behavior is keyed by an argument of the command, normally the
/// test identifier. Unscripted commands exit 0 immediately.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(mut self, test: &str, delay_ms: u64, code: i32) -> Self {
        let delay = Duration::from_millis(delay_ms);
        self.scripts
            .insert(test.to_string(), Script::Exit { delay, code });
        self
    }

    pub(crate) fn spawn_failure(mut self, test: &str) -> Self {
        self.scripts.insert(test.to_string(), Script::SpawnFailure);
        self
    }

    /// Highest number of commands observed running at once.
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lookup(&self, command: &CommandSpec) -> Script {
        command
            .args
            .iter()
            .find_map(|arg| self.scripts.get(arg).copied())
            .unwrap_or(Script::Exit {
                delay: Duration::ZERO,
                code: 0,
            })
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        deadline: Duration,
        cancel: CancellationToken,
    ) -> Result<ProcessOutput, ExecError> {
        let (delay, code) = match self.lookup(command) {
            Script::Exit { delay, code } => (delay, code),
            Script::SpawnFailure => return Err(ExecError::NotFound(command.program.clone())),
        };

        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let started = Instant::now();

        let (timed_out, cancelled) = tokio::select! {
            _ = tokio::time::sleep(delay.min(deadline)) => (delay > deadline, false),
            _ = cancel.cancelled() => (false, true),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        Ok(ProcessOutput {
            exit_code: (!timed_out && !cancelled).then_some(code),
            output: CapturedOutput {
                stdout: format!("{}\n", command),
                ..CapturedOutput::default()
            },
            timed_out,
            cancelled,
            elapsed: started.elapsed(),
        })
    }
}

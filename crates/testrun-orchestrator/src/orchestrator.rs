//! The orchestrator instance.
//!
//! Submission validates, builds the command and records a QUEUED run, then
//! returns immediately. Each run executes in its own tracked task that waits
//! for a worker-pool permit, drives the external process, classifies the
//! result and writes the terminal record. Shutdown cancels every in-flight
//! run and joins the tasks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use testrun_core::{
    build_command, classify, outcome_message, CommandPlan, OutcomeStatus, RunCompletion, RunId,
    RunRecord, RunStatus, RunTransition, TestRunRequest,
};
use testrun_process::{CommandRunner, ProcessExecutor, ProcessOutput};

use crate::artifacts;
use crate::config::OrchestratorConfig;
use crate::dispatcher::{self, BatchOptions, BatchResult};
use crate::error::{SubmitError, TrackerError};
use crate::metrics::RunStats;
use crate::state::{RunTracker, RunUpdate};

/// Error recorded on runs that were cancelled.
pub const CANCELLED: &str = "cancelled";

type RunHandle = JoinHandle<Result<RunRecord, TrackerError>>;

/// Cancellation tokens of runs that have not finished yet.
type CancelMap = Arc<Mutex<HashMap<RunId, CancellationToken>>>;

/// Orchestrates test runs across external frameworks.
pub struct Orchestrator {
    config: OrchestratorConfig,
    tracker: Arc<RunTracker>,
    runner: Arc<dyn CommandRunner>,

    /// Bounds simultaneously running processes.
    permits: Arc<Semaphore>,

    /// Every spawned run task, joined on shutdown.
    tasks: TaskTracker,

    /// Parent of every run's cancellation token.
    shutdown: CancellationToken,

    cancels: CancelMap,
}

impl Orchestrator {
    /// Create an orchestrator that spawns real processes.
    pub fn new(config: OrchestratorConfig) -> Self {
        let executor = ProcessExecutor::new()
            .with_max_output_bytes(config.max_output_bytes)
            .with_kill_grace(config.kill_grace());
        Self::with_runner(config, Arc::new(executor))
    }

    /// Create an orchestrator with a custom command runner.
    pub fn with_runner(mut config: OrchestratorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        if let Err(e) = config.resolve_artifact_root() {
            warn!(error = %e, "Could not resolve artifact root, keeping it relative");
        }

        info!(
            max_concurrent_runs = config.max_concurrent_runs,
            default_timeout_secs = config.default_timeout_secs,
            artifact_root = %config.artifact_root.display(),
            "Creating orchestrator"
        );

        Self {
            tracker: RunTracker::new(config.update_channel_capacity),
            permits: Arc::new(Semaphore::new(config.max_concurrent_runs.max(1))),
            runner,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            cancels: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a run. Returns as soon as the run is recorded.
    pub async fn submit(&self, request: TestRunRequest) -> Result<RunId, SubmitError> {
        let (id, _handle) = self.dispatch(request).await?;
        Ok(id)
    }

    /// Submit a run and hand back the task that drives it.
    pub(crate) async fn dispatch(
        &self,
        request: TestRunRequest,
    ) -> Result<(RunId, RunHandle), SubmitError> {
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let request = request.validate().map_err(|e| {
            warn!(error = %e, "Rejected run request");
            e
        })?;
        let id = self.tracker.reserve_id();
        let settings = self.config.frameworks.get(request.framework);
        let plan = build_command(&request, settings, &self.config.artifact_root, id)?;
        let deadline = request.deadline(self.config.default_timeout());
        let test_identifier = request.test_identifier.clone();

        self.tracker.insert(id, request.into_inner()).await;
        let cancel = self.shutdown.child_token();
        self.cancels.lock().await.insert(id, cancel.clone());

        info!(
            run_id = %id,
            framework = %plan.framework,
            test = %test_identifier,
            deadline_secs = deadline.as_secs(),
            "Run submitted"
        );

        let context = RunContext {
            tracker: self.tracker.clone(),
            runner: self.runner.clone(),
            permits: self.permits.clone(),
            cancels: self.cancels.clone(),
        };
        let job = RunJob {
            id,
            plan,
            test_identifier,
            deadline,
            cancel,
        };
        let handle = self.tasks.spawn(context.execute(job));
        Ok((id, handle))
    }

    /// Current snapshot of a run.
    pub async fn status(&self, id: RunId) -> Result<RunRecord, TrackerError> {
        self.tracker.get(id).await
    }

    /// Wait until a run reaches a terminal state.
    pub async fn wait(&self, id: RunId) -> Result<RunRecord, TrackerError> {
        let mut updates = self.tracker.subscribe();
        loop {
            let record = self.tracker.get(id).await?;
            if record.is_terminal() {
                return Ok(record);
            }

            loop {
                match updates.recv().await {
                    Ok(update) if update.run_id == id && update.status.is_terminal() => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        debug!(
                            run_id = %id,
                            skipped = n,
                            "Update stream lagged, re-reading record"
                        );
                        break;
                    }
                    Err(RecvError::Closed) => return self.tracker.get(id).await,
                }
            }
        }
    }

    /// Cancel a run. Returns the status observed when the request was made;
    /// terminal runs are left untouched.
    pub async fn cancel(&self, id: RunId) -> Result<RunStatus, TrackerError> {
        let record = self.tracker.get(id).await?;
        if let Some(token) = self.cancels.lock().await.get(&id) {
            info!(run_id = %id, status = %record.status, "Cancelling run");
            token.cancel();
        }
        Ok(record.status)
    }

    /// Snapshots of all runs, optionally filtered by status.
    pub async fn list(&self, filter: Option<RunStatus>) -> Vec<RunRecord> {
        self.tracker.list(filter).await
    }

    /// Aggregate statistics over every run.
    pub async fn stats(&self) -> RunStats {
        let records = self.tracker.list(None).await;
        RunStats::from_records(&records)
    }

    /// Receive every subsequent status change.
    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.tracker.subscribe()
    }

    /// Run a batch and return outcomes in submission order.
    pub async fn submit_batch(
        &self,
        requests: Vec<TestRunRequest>,
        options: BatchOptions,
    ) -> BatchResult {
        dispatcher::run_batch(self, requests, options).await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting runs, cancel everything in flight and wait for it.
    pub async fn shutdown(&self) {
        let in_flight = self.cancels.lock().await.len();
        info!(in_flight, "Shutting down orchestrator");

        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        info!("Orchestrator stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One scheduled run, owned by its background task.
struct RunJob {
    id: RunId,
    plan: CommandPlan,
    test_identifier: String,
    deadline: Duration,
    cancel: CancellationToken,
}

/// Shared handles a run task needs.
#[derive(Clone)]
struct RunContext {
    tracker: Arc<RunTracker>,
    runner: Arc<dyn CommandRunner>,
    permits: Arc<Semaphore>,
    cancels: CancelMap,
}

impl RunContext {
    async fn execute(self, job: RunJob) -> Result<RunRecord, TrackerError> {
        let id = job.id;
        let completion = self.drive(&job).await;
        let status = completion.status;
        let exit_code = completion.exit_code;

        let finished = self
            .tracker
            .transition(id, RunTransition::Finish(completion))
            .await;
        self.cancels.lock().await.remove(&id);

        match finished {
            Ok(_) => info!(run_id = %id, status = %status, exit_code = ?exit_code, "Run finished"),
            Err(e) => error!(run_id = %id, error = %e, "Failed to record run completion"),
        }

        self.tracker.get(id).await
    }

    async fn drive(&self, job: &RunJob) -> RunCompletion {
        let permit = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => {
                info!(run_id = %job.id, "Run cancelled before it started");
                return RunCompletion::error(CANCELLED);
            }
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return RunCompletion::error("worker pool closed"),
            },
        };

        if let Err(e) = self.tracker.transition(job.id, RunTransition::Start).await {
            error!(run_id = %job.id, error = %e, "Failed to mark run as started");
            return RunCompletion::error(e.to_string());
        }
        debug!(run_id = %job.id, command = %job.plan.command, "Run started");

        let since = SystemTime::now();
        let result = self
            .runner
            .run(&job.plan.command, job.deadline, job.cancel.clone())
            .await;
        drop(permit);

        match result {
            Ok(output) => complete(job, output, since).await,
            Err(e) => {
                warn!(run_id = %job.id, error = %e, "Failed to launch test process");
                RunCompletion::error(e.to_string())
            }
        }
    }
}

/// Turn process output into the run's terminal fields.
async fn complete(job: &RunJob, output: ProcessOutput, since: SystemTime) -> RunCompletion {
    if output.cancelled {
        let mut completion = RunCompletion::error(CANCELLED);
        completion.output = output.output;
        return completion;
    }

    let status = classify(&job.plan.policy, output.exit_code, output.timed_out);
    let message = outcome_message(
        job.plan.framework,
        &job.test_identifier,
        status,
        output.exit_code,
        &output.output,
        job.deadline,
    );
    let error = match status {
        OutcomeStatus::Timeout | OutcomeStatus::Error => Some(message.clone()),
        OutcomeStatus::Passed | OutcomeStatus::Failed => None,
    };
    let (screenshots, report_url) = collect_artifacts(&job.plan, since).await;

    RunCompletion {
        status,
        exit_code: output.exit_code,
        output: output.output,
        error,
        message,
        screenshots,
        report_url,
    }
}

async fn collect_artifacts(plan: &CommandPlan, since: SystemTime) -> (Vec<String>, Option<String>) {
    let output_dir = plan.output_dir.clone();
    let report_path = plan.report_path.clone();

    tokio::task::spawn_blocking(move || {
        let screenshots = output_dir
            .as_deref()
            .map(|dir| artifacts::collect_screenshots(dir, since))
            .unwrap_or_default();
        let report_url = report_path.as_deref().and_then(artifacts::report_reference);
        (screenshots, report_url)
    })
    .await
    .unwrap_or_else(|e| {
        warn!(error = %e, "Artifact collection failed");
        (Vec::new(), None)
    })
}

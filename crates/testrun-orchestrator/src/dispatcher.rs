//! Batch dispatch.
//!
//! A batch fans requests out through the orchestrator, limited by a
//! batch-local semaphore, and fans outcomes back in by input position. A
//! failing item never aborts its siblings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use testrun_core::{RunId, TestOutcome, TestRunRequest};

use crate::orchestrator::Orchestrator;

/// How batch items are scheduled relative to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchMode {
    /// Up to `max_concurrent` items at once.
    #[default]
    Parallel,
    /// One item at a time, in input order.
    Sequential,
}

/// Options for a single batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub mode: BatchMode,
    /// Parallel limit. Defaults to the orchestrator's `max_concurrent_runs`.
    pub max_concurrent: Option<usize>,
    /// Receives a progress event each time an item completes.
    pub progress: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl BatchOptions {
    pub fn sequential() -> Self {
        Self {
            mode: BatchMode::Sequential,
            ..Self::default()
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<BatchProgress>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Batch progress after an item completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
}

impl BatchProgress {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    /// Position in the submitted batch.
    pub index: usize,
    /// Absent when the request was rejected before a run was created.
    pub run_id: Option<RunId>,
    pub outcome: TestOutcome,
}

/// Outcomes of a batch, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub completed: usize,
    pub results: Vec<BatchItem>,
}

impl BatchResult {
    pub fn outcomes(&self) -> impl Iterator<Item = &TestOutcome> {
        self.results.iter().map(|item| &item.outcome)
    }
}

/// Counts completions and publishes progress.
struct Progress {
    total: usize,
    completed: AtomicUsize,
    sink: Option<mpsc::UnboundedSender<BatchProgress>>,
}

impl Progress {
    fn item_done(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(completed, total = self.total, "Batch item completed");
        if let Some(sink) = &self.sink {
            // A dropped receiver only means nobody is watching.
            let _ = sink.send(BatchProgress {
                completed,
                total: self.total,
            });
        }
    }
}

/// Run every request and collect outcomes by input position.
pub(crate) async fn run_batch(
    orchestrator: &Orchestrator,
    requests: Vec<TestRunRequest>,
    options: BatchOptions,
) -> BatchResult {
    let total = requests.len();
    let limit = match options.mode {
        BatchMode::Sequential => 1,
        BatchMode::Parallel => options
            .max_concurrent
            .unwrap_or(orchestrator.config().max_concurrent_runs)
            .max(1),
    };
    info!(total, limit, mode = ?options.mode, "Dispatching batch");

    let gate = Arc::new(Semaphore::new(limit));
    let progress = Arc::new(Progress {
        total,
        completed: AtomicUsize::new(0),
        sink: options.progress,
    });
    let mut slots: Vec<Option<BatchItem>> = vec![None; total];
    let mut running = JoinSet::new();

    for (index, request) in requests.into_iter().enumerate() {
        let Ok(permit) = gate.clone().acquire_owned().await else {
            break;
        };

        match orchestrator.dispatch(request).await {
            Ok((run_id, handle)) => {
                let progress = progress.clone();
                running.spawn(async move {
                    let outcome = match handle.await {
                        Ok(Ok(record)) => record.outcome.unwrap_or_else(|| {
                            TestOutcome::error("run finished without an outcome")
                        }),
                        Ok(Err(e)) => TestOutcome::error(e.to_string()),
                        Err(e) => TestOutcome::error(format!("run task failed: {}", e)),
                    };
                    drop(permit);
                    progress.item_done();
                    BatchItem {
                        index,
                        run_id: Some(run_id),
                        outcome,
                    }
                });
            }
            Err(e) => {
                drop(permit);
                warn!(index, error = %e, "Batch item rejected");
                slots[index] = Some(BatchItem {
                    index,
                    run_id: None,
                    outcome: TestOutcome::error(e.to_string()),
                });
                progress.item_done();
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        match joined {
            Ok(item) => {
                let index = item.index;
                slots[index] = Some(item);
            }
            Err(e) => error!(error = %e, "Batch item task failed"),
        }
    }

    let completed = slots.iter().filter(|slot| slot.is_some()).count();
    let results = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| BatchItem {
                index,
                run_id: None,
                outcome: TestOutcome::error("batch item did not complete"),
            })
        })
        .collect();

    info!(total, completed, "Batch finished");
    BatchResult {
        total,
        completed,
        results,
    }
}

//! Run state tracking.
//!
//! The tracker is the single source of truth for run status. The outer map
//! lock is only held long enough to look up or insert a record handle; each
//! record has its own lock, so updates to one run never wait on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error};

use testrun_core::{RunId, RunRecord, RunStatus, RunTransition, TestRunRequest};

use crate::error::TrackerError;

/// Notification emitted on every status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunUpdate {
    pub run_id: RunId,
    pub status: RunStatus,
    pub at: DateTime<Utc>,
}

/// Concurrency-safe table of run records.
pub struct RunTracker {
    /// Next identifier to hand out.
    next_id: AtomicU64,

    /// Records indexed by RunId.
    runs: RwLock<HashMap<RunId, Arc<Mutex<RunRecord>>>>,

    /// Status change fan-out.
    updates: broadcast::Sender<RunUpdate>,
}

impl RunTracker {
    /// Create a new tracker wrapped in Arc.
    pub fn new(update_capacity: usize) -> Arc<Self> {
        let (updates, _) = broadcast::channel(update_capacity.max(1));
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            runs: RwLock::new(HashMap::new()),
            updates,
        })
    }

    /// Allocate a fresh id and insert a QUEUED record for `request`.
    pub async fn create(&self, request: TestRunRequest) -> RunId {
        let id = self.reserve_id();
        self.insert(id, request).await;
        id
    }

    /// Hand out an id without recording anything yet. Ids are never reused,
    /// even if the reservation is abandoned.
    pub fn reserve_id(&self) -> RunId {
        RunId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert a QUEUED record under a reserved id.
    pub async fn insert(&self, id: RunId, request: TestRunRequest) {
        let now = Utc::now();
        let record = RunRecord::new(id, request, now);

        self.runs
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(record)));

        debug!(run_id = %id, "Run record created");
        self.notify(RunUpdate {
            run_id: id,
            status: RunStatus::Queued,
            at: now,
        });
    }

    /// Move a run forward. Terminal fields land in the same critical section
    /// as the terminal status.
    pub async fn transition(
        &self,
        id: RunId,
        transition: RunTransition,
    ) -> Result<RunStatus, TrackerError> {
        let handle = self.handle(id).await?;
        let mut record = handle.lock().await;
        let now = Utc::now();

        record.apply(transition, now).map_err(|source| {
            error!(run_id = %id, error = %source, "Rejected run transition");
            TrackerError::InvalidTransition { id, source }
        })?;

        let status = record.status;
        drop(record);

        debug!(run_id = %id, status = %status, "Run transitioned");
        self.notify(RunUpdate {
            run_id: id,
            status,
            at: now,
        });
        Ok(status)
    }

    /// Snapshot of one record.
    pub async fn get(&self, id: RunId) -> Result<RunRecord, TrackerError> {
        let handle = self.handle(id).await?;
        let record = handle.lock().await;
        Ok(record.clone())
    }

    /// Snapshots of all records, optionally filtered by status, ordered by id.
    pub async fn list(&self, filter: Option<RunStatus>) -> Vec<RunRecord> {
        let handles: Vec<Arc<Mutex<RunRecord>>> =
            self.runs.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(handles.len());
        for handle in handles {
            let record = handle.lock().await;
            if filter.map_or(true, |status| record.status == status) {
                records.push(record.clone());
            }
        }
        records.sort_by_key(|r| r.id);
        records
    }

    /// Number of tracked runs.
    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Receive every subsequent status change.
    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.updates.subscribe()
    }

    async fn handle(&self, id: RunId) -> Result<Arc<Mutex<RunRecord>>, TrackerError> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TrackerError::NotFound(id))
    }

    fn notify(&self, update: RunUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use testrun_core::{Framework, OutcomeStatus, RunCompletion};

    fn request() -> TestRunRequest {
        TestRunRequest::new(Framework::Pytest, "test_x")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let tracker = RunTracker::new(16);
        let id = tracker.create(request()).await;

        let record = tracker.get(id).await.unwrap();
        assert_eq!(record.status, RunStatus::Queued);
        assert!(record.completed_at.is_none());
        assert_eq!(tracker.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let tracker = RunTracker::new(16);
        assert!(matches!(
            tracker.get(RunId::new(99)).await,
            Err(TrackerError::NotFound(_))
        ));
        assert!(matches!(
            tracker.transition(RunId::new(99), RunTransition::Start).await,
            Err(TrackerError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_get_unique_ids() {
        let tracker = RunTracker::new(16);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(tracker.create(request()).await);
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(tracker.len().await, 400);
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let tracker = RunTracker::new(16);
        let id = tracker.create(request()).await;
        tracker.transition(id, RunTransition::Start).await.unwrap();
        tracker
            .transition(
                id,
                RunTransition::Finish(RunCompletion::new(OutcomeStatus::Failed, "failed")),
            )
            .await
            .unwrap();
        let first = tracker.get(id).await.unwrap();

        let err = tracker
            .transition(
                id,
                RunTransition::Finish(RunCompletion::new(OutcomeStatus::Passed, "late")),
            )
            .await;
        assert!(matches!(err, Err(TrackerError::InvalidTransition { .. })));

        let after = tracker.get(id).await.unwrap();
        assert_eq!(after.status, RunStatus::Failed);
        assert_eq!(after.completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let tracker = RunTracker::new(16);
        let a = tracker.create(request()).await;
        let b = tracker.create(request()).await;
        tracker.transition(b, RunTransition::Start).await.unwrap();

        let all = tracker.list(None).await;
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);

        let running = tracker.list(Some(RunStatus::Running)).await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b);
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let tracker = RunTracker::new(16);
        let mut rx = tracker.subscribe();

        let id = tracker.create(request()).await;
        tracker.transition(id, RunTransition::Start).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().status, RunStatus::Queued);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.run_id, id);
        assert_eq!(update.status, RunStatus::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_terminal_without_completion() {
        let tracker = RunTracker::new(1024);
        let id = tracker.create(request()).await;

        let reader = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let record = tracker.get(id).await.unwrap();
                    assert_eq!(record.status.is_terminal(), record.completed_at.is_some());
                    tokio::task::yield_now().await;
                }
            })
        };

        tracker.transition(id, RunTransition::Start).await.unwrap();
        tracker
            .transition(id, RunTransition::Finish(RunCompletion::error("boom")))
            .await
            .unwrap();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_reserved_id_is_not_listed_until_inserted() {
        let tracker = RunTracker::new(16);
        let reserved = tracker.reserve_id();
        assert!(tracker.is_empty().await);

        let created = tracker.create(request()).await;
        assert!(created > reserved);

        tracker.insert(reserved, request()).await;
        let ids: Vec<_> = tracker.list(None).await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![reserved, created]);
    }
}

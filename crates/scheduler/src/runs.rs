//! Run records: one per execution attempt of a job.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use brandops_core::{JobId, RunId};

/// Run execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// One execution attempt of a job.
///
/// `attempt_number` is written once at creation time, derived from the
/// previous run for the same job, and never re-derived elsewhere. Terminal
/// runs are immutable; only the recovery sweeper may force a `Running` run
/// to `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub job_id: JobId,
    /// 1 for a fresh trigger; previous + 1 while retrying the same failure
    /// sequence; resets to 1 after a success or exhaustion
    pub attempt_number: u32,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Free-text outcome detail on success
    pub log: Option<String>,
    /// Failure detail; also carries the sweeper's synthetic error
    pub error_message: Option<String>,
}

impl Run {
    /// Create a run in `Running` status, started now.
    pub fn start(job_id: JobId, attempt_number: u32) -> Self {
        Self {
            id: RunId::new(),
            job_id,
            attempt_number,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            log: None,
            error_message: None,
        }
    }

    pub fn complete(&mut self, log: Option<String>, finished_at: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(finished_at);
        self.log = log;
    }

    pub fn fail(&mut self, error: impl Into<String>, finished_at: DateTime<Utc>) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(finished_at);
        self.error_message = Some(error.into());
    }
}

/// Run store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunStoreError {
    #[error("run not found: {0}")]
    NotFound(RunId),
    #[error("run already exists: {0}")]
    AlreadyExists(RunId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Run persistence abstraction.
pub trait RunStore: Send + Sync {
    fn insert(&self, run: Run) -> Result<RunId, RunStoreError>;

    fn update(&self, run: &Run) -> Result<(), RunStoreError>;

    fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError>;

    /// Most recent run for a job (by start time), if any. This is the sole
    /// input to attempt-number derivation.
    fn latest_for_job(&self, job_id: JobId) -> Result<Option<Run>, RunStoreError>;

    /// All runs for a job, oldest first.
    fn list_for_job(&self, job_id: JobId) -> Result<Vec<Run>, RunStoreError>;

    /// Runs still `Running` that started at or before the cutoff. Feeds the
    /// recovery sweeper.
    fn running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, RunStoreError>;

    /// Number of non-terminal runs for a job.
    fn running_count_for_job(&self, job_id: JobId) -> Result<usize, RunStoreError>;
}

/// In-memory run store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<RunId, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl RunStore for InMemoryRunStore {
    fn insert(&self, run: Run) -> Result<RunId, RunStoreError> {
        let mut runs = self.runs.write().unwrap();
        if runs.contains_key(&run.id) {
            return Err(RunStoreError::AlreadyExists(run.id));
        }
        let id = run.id;
        runs.insert(id, run);
        Ok(id)
    }

    fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        let mut runs = self.runs.write().unwrap();
        if !runs.contains_key(&run.id) {
            return Err(RunStoreError::NotFound(run.id));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        let runs = self.runs.read().unwrap();
        Ok(runs.get(&run_id).cloned())
    }

    fn latest_for_job(&self, job_id: JobId) -> Result<Option<Run>, RunStoreError> {
        let runs = self.runs.read().unwrap();
        Ok(runs
            .values()
            .filter(|r| r.job_id == job_id)
            .max_by_key(|r| (r.started_at, r.id))
            .cloned())
    }

    fn list_for_job(&self, job_id: JobId) -> Result<Vec<Run>, RunStoreError> {
        let runs = self.runs.read().unwrap();
        let mut result: Vec<_> = runs.values().filter(|r| r.job_id == job_id).cloned().collect();
        result.sort_by_key(|r| (r.started_at, r.id));
        Ok(result)
    }

    fn running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, RunStoreError> {
        let runs = self.runs.read().unwrap();
        let mut result: Vec<_> = runs
            .values()
            .filter(|r| r.status == RunStatus::Running && r.started_at <= cutoff)
            .cloned()
            .collect();
        result.sort_by_key(|r| (r.started_at, r.id));
        Ok(result)
    }

    fn running_count_for_job(&self, job_id: JobId) -> Result<usize, RunStoreError> {
        let runs = self.runs.read().unwrap();
        Ok(runs
            .values()
            .filter(|r| r.job_id == job_id && r.status == RunStatus::Running)
            .count())
    }
}

impl RunStore for Arc<InMemoryRunStore> {
    fn insert(&self, run: Run) -> Result<RunId, RunStoreError> {
        (**self).insert(run)
    }

    fn update(&self, run: &Run) -> Result<(), RunStoreError> {
        (**self).update(run)
    }

    fn get(&self, run_id: RunId) -> Result<Option<Run>, RunStoreError> {
        (**self).get(run_id)
    }

    fn latest_for_job(&self, job_id: JobId) -> Result<Option<Run>, RunStoreError> {
        (**self).latest_for_job(job_id)
    }

    fn list_for_job(&self, job_id: JobId) -> Result<Vec<Run>, RunStoreError> {
        (**self).list_for_job(job_id)
    }

    fn running_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, RunStoreError> {
        (**self).running_older_than(cutoff)
    }

    fn running_count_for_job(&self, job_id: JobId) -> Result<usize, RunStoreError> {
        (**self).running_count_for_job(job_id)
    }
}

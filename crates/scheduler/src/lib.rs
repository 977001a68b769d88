//! `brandops-scheduler` — job scheduling and execution control plane.
//!
//! ## Design
//!
//! - Jobs are tenant-scoped (or platform-wide) and typed; a persisted job
//!   table drives a single background worker
//! - One run record per execution attempt, with an explicit attempt number
//! - Retry with fixed-step backoff; recurring jobs degrade to their cadence
//!   on exhaustion, one-time jobs go dead
//! - A recovery sweeper force-fails runs abandoned by a crashed worker
//! - Per-dataset freshness ledger so a failing job can never make stale
//!   data look current
//!
//! ## Components
//!
//! - `Job`/`JobStore`: persisted job definitions (recurring or one-time)
//! - `Run`/`RunStore`: execution attempt records
//! - `HandlerRegistry`: job-type string -> business handler dispatch
//! - `FreshnessTracker`: fire-and-forget dataset freshness ledger
//! - `Scheduler`: the tick loop (recover, select due, dispatch, record)

pub mod cadence;
pub mod freshness;
pub mod jobs;
pub mod registry;
pub mod retry;
pub mod runs;
pub mod worker;

pub use cadence::Cadence;
pub use freshness::{
    DatasetKey, FreshnessRecord, FreshnessStatus, FreshnessStore, FreshnessStoreError,
    FreshnessTracker, InMemoryFreshnessStore,
};
pub use jobs::queue::JobQueue;
pub use jobs::store::{InMemoryJobStore, JobStore, JobStoreError};
pub use jobs::types::{Job, JobStatus, Schedule, TriggerSource};
pub use registry::{HandlerContext, HandlerOutcome, HandlerRegistry, JobHandler};
pub use runs::{InMemoryRunStore, Run, RunStatus, RunStore, RunStoreError};
pub use worker::{Scheduler, SchedulerConfig, TickSummary, WorkerHandle};

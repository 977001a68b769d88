//! The scheduler/worker loop: the single authority that decides what runs,
//! when, and what happens after.
//!
//! Single active worker, sequential dispatch within a tick. The recovery
//! sweeper always runs before job selection; that ordering is load-bearing
//! (a stuck run must be resolved before its parent job could be considered
//! due again in the same cycle).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::jobs::store::{JobStore, JobStoreError};
use crate::jobs::types::{Job, Schedule};
use crate::registry::{HandlerContext, HandlerOutcome, HandlerRegistry};
use crate::retry::{RetryDecision, decide};
use crate::runs::{Run, RunStatus, RunStore, RunStoreError};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the worker polls for due jobs
    pub poll_interval: Duration,
    /// Age past which a `Running` run is presumed abandoned. A single
    /// global constant: a legitimately long operation exceeding it will be
    /// incorrectly recovered and retried — an accepted, documented risk.
    pub stuck_threshold: chrono::Duration,
    /// Worker name for logs and the thread name
    pub name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            stuck_threshold: chrono::Duration::minutes(30),
            name: "scheduler-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stuck_threshold(mut self, threshold: chrono::Duration) -> Self {
        self.stuck_threshold = threshold;
        self
    }
}

/// Counters for one tick, for logs and inspection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    /// Stuck runs force-failed by the recovery sweeper
    pub recovered: usize,
    /// Due jobs dispatched this tick
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Internal error for store access during a tick. Converted to logs at the
/// loop boundary; never escapes the worker.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job store: {0}")]
    JobStore(#[from] JobStoreError),
    #[error("run store: {0}")]
    RunStore(#[from] RunStoreError),
}

/// Handle to control a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// The orchestrating component: polls the job store, recovers stuck runs,
/// dispatches due jobs to handlers, records run outcomes, and applies the
/// retry/backoff policy.
pub struct Scheduler<J: JobStore, R: RunStore> {
    jobs: J,
    runs: R,
    registry: HandlerRegistry,
    config: SchedulerConfig,
}

impl<J: JobStore, R: RunStore> Scheduler<J, R> {
    pub fn new(jobs: J, runs: R, registry: HandlerRegistry, config: SchedulerConfig) -> Self {
        Self {
            jobs,
            runs,
            registry,
            config,
        }
    }

    /// One poll cycle. Takes no hidden state beyond the store handles, so
    /// tests drive it directly without a timer.
    pub fn tick(&self) -> TickSummary {
        let now = Utc::now();
        let mut summary = TickSummary {
            recovered: self.recover_stuck_runs(now),
            ..TickSummary::default()
        };

        let due = match self.jobs.list_due(now) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to query due jobs");
                return summary;
            }
        };

        for job in due {
            summary.dispatched += 1;
            // A single job's failure must never block other due jobs.
            match self.run_job(job) {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(error = %e, "store failure while running job");
                }
            }
        }

        if summary.dispatched > 0 || summary.recovered > 0 {
            info!(
                recovered = summary.recovered,
                dispatched = summary.dispatched,
                succeeded = summary.succeeded,
                failed = summary.failed,
                "tick complete"
            );
        } else {
            debug!("tick complete; nothing due");
        }
        summary
    }

    /// Force-fail runs abandoned past the stuck threshold and feed them
    /// through the normal retry path. Returns the number recovered.
    pub fn recover_stuck_runs(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.stuck_threshold;
        let stuck = match self.runs.running_older_than(cutoff) {
            Ok(stuck) => stuck,
            Err(e) => {
                error!(error = %e, "failed to query stuck runs");
                return 0;
            }
        };

        let mut recovered = 0;
        for mut run in stuck {
            let synthetic = format!(
                "recovered: exceeded stuck threshold of {} minutes",
                self.config.stuck_threshold.num_minutes()
            );
            warn!(
                run_id = %run.id,
                job_id = %run.job_id,
                started_at = %run.started_at,
                "force-failing stuck run"
            );

            run.fail(&synthetic, now);
            if let Err(e) = self.runs.update(&run) {
                error!(run_id = %run.id, error = %e, "failed to persist recovered run");
                continue;
            }

            match self.jobs.get(run.job_id) {
                Ok(Some(mut job)) => {
                    if let Err(e) =
                        self.reschedule_after_failure(&mut job, run.attempt_number, synthetic, now)
                    {
                        error!(job_id = %job.id, error = %e, "failed to reschedule after recovery");
                    }
                }
                Ok(None) => {
                    warn!(job_id = %run.job_id, run_id = %run.id, "stuck run references missing job")
                }
                Err(e) => error!(job_id = %run.job_id, error = %e, "failed to load job for stuck run"),
            }

            recovered += 1;
        }
        recovered
    }

    /// Create a run, dispatch to the handler, record the outcome.
    /// Returns Ok(true) on handler success, Ok(false) on handler failure.
    fn run_job(&self, mut job: Job) -> Result<bool, SchedulerError> {
        let attempt_number = self.next_attempt_number(&job)?;
        let mut run = Run::start(job.id, attempt_number);
        self.runs.insert(run.clone())?;

        let Some(handler) = self.registry.get(&job.job_type) else {
            // Deployment defect, not a transient failure: no backoff retry.
            let error = format!("no handler registered for job type '{}'", job.job_type);
            warn!(job_id = %job.id, job_type = %job.job_type, "unregistered job type");
            run.fail(&error, Utc::now());
            self.runs.update(&run)?;
            self.fail_without_retry(&mut job, error)?;
            return Ok(false);
        };

        debug!(
            job_id = %job.id,
            run_id = %run.id,
            job_type = %job.job_type,
            attempt = attempt_number,
            "dispatching job"
        );

        let ctx = HandlerContext {
            tenant_id: job.tenant_id,
            parameters: &job.parameters,
            run_id: run.id,
        };
        // A panicking handler must never take down the worker.
        let outcome = catch_unwind(AssertUnwindSafe(|| handler.execute(ctx)))
            .unwrap_or_else(|panic| HandlerOutcome::failure(panic_message(&panic)));

        let finished = Utc::now();
        match outcome {
            HandlerOutcome::Success { records_affected } => {
                run.complete(
                    records_affected.map(|n| format!("{n} records affected")),
                    finished,
                );
                self.runs.update(&run)?;
                job.mark_succeeded(finished);
                self.jobs.update(&job)?;
                debug!(job_id = %job.id, run_id = %run.id, "job completed");
                Ok(true)
            }
            HandlerOutcome::Failure { error } => {
                warn!(job_id = %job.id, run_id = %run.id, error = %error, "job failed");
                run.fail(&error, finished);
                self.runs.update(&run)?;
                self.reschedule_after_failure(&mut job, attempt_number, error, finished)?;
                Ok(false)
            }
        }
    }

    /// Attempt number for the next run: continues a failure sequence whose
    /// retries are not yet exhausted, otherwise starts fresh at 1.
    fn next_attempt_number(&self, job: &Job) -> Result<u32, SchedulerError> {
        let latest = self.runs.latest_for_job(job.id)?;
        Ok(match latest {
            Some(run)
                if run.status == RunStatus::Failed && run.attempt_number < job.max_retries =>
            {
                run.attempt_number + 1
            }
            _ => 1,
        })
    }

    /// Apply the retry policy after a failed attempt and persist the job.
    fn reschedule_after_failure(
        &self,
        job: &mut Job,
        attempt_number: u32,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        match decide(job, attempt_number, now) {
            RetryDecision::RetryAfterBackoff { next_run_at } => {
                info!(
                    job_id = %job.id,
                    attempt = attempt_number,
                    next_run_at = %next_run_at,
                    "rescheduling with backoff"
                );
                job.reschedule(error, next_run_at, now);
            }
            RetryDecision::ResumeCadence { next_run_at } => {
                warn!(
                    job_id = %job.id,
                    attempt = attempt_number,
                    next_run_at = %next_run_at,
                    "retries exhausted; resuming regular cadence"
                );
                job.reschedule(error, next_run_at, now);
            }
            RetryDecision::MarkDead => {
                warn!(job_id = %job.id, attempt = attempt_number, "retries exhausted; job is dead");
                job.mark_dead(error, now);
            }
        }
        self.jobs.update(job)?;
        Ok(())
    }

    /// Configuration errors skip the backoff path entirely: recurring jobs
    /// fall back to their cadence (they recover once the handler ships),
    /// one-time jobs can never succeed and go straight to dead.
    fn fail_without_retry(&self, job: &mut Job, error: String) -> Result<(), SchedulerError> {
        let now = Utc::now();
        match job.schedule {
            Schedule::Recurring { cadence } => {
                job.reschedule(error, cadence.next_after(now), now)
            }
            Schedule::OneTime => job.mark_dead(error, now),
        }
        self.jobs.update(job)?;
        Ok(())
    }
}

impl<J: JobStore + 'static, R: RunStore + 'static> Scheduler<J, R> {
    /// Spawn the worker loop in a background thread. `tick()` remains
    /// directly callable for tests.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = self.config.name.clone();

        let join = thread::Builder::new()
            .name(name)
            .spawn(move || scheduler_loop(self, shutdown_rx))
            .expect("failed to spawn scheduler worker thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn scheduler_loop<J: JobStore, R: RunStore>(
    scheduler: Scheduler<J, R>,
    shutdown_rx: mpsc::Receiver<()>,
) {
    info!(worker = %scheduler.config.name, "scheduler worker started");

    loop {
        scheduler.tick();

        // Sleep between polls; a shutdown request wakes us immediately.
        match shutdown_rx.recv_timeout(scheduler.config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }

    info!(worker = %scheduler.config.name, "scheduler worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

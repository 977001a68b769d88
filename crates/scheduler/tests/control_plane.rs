//! End-to-end scenarios for the scheduling control plane, driven entirely
//! through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};

use brandops_core::{JobId, TenantId};
use brandops_scheduler::{
    Cadence, DatasetKey, FreshnessTracker, HandlerContext, HandlerOutcome, HandlerRegistry,
    InMemoryFreshnessStore, InMemoryJobStore, InMemoryRunStore, Job, JobQueue, JobStatus, JobStore,
    RunStatus, RunStore, Scheduler, SchedulerConfig,
};

type TestScheduler = Scheduler<Arc<InMemoryJobStore>, Arc<InMemoryRunStore>>;

fn build(registry: HandlerRegistry) -> (TestScheduler, Arc<InMemoryJobStore>, Arc<InMemoryRunStore>) {
    let jobs = InMemoryJobStore::arc();
    let runs = InMemoryRunStore::arc();
    let scheduler = Scheduler::new(
        jobs.clone(),
        runs.clone(),
        registry,
        SchedulerConfig::default(),
    );
    (scheduler, jobs, runs)
}

/// Pull a job's `next_run_at` into the past so the next tick picks it up,
/// simulating elapsed backoff without sleeping.
fn rewind_to_due(jobs: &Arc<InMemoryJobStore>, job_id: JobId) {
    let mut job = jobs.get(job_id).unwrap().unwrap();
    job.next_run_at = Utc::now() - Duration::seconds(1);
    jobs.update(&job).unwrap();
}

#[test]
fn recurring_job_exhausts_retries_and_reverts_to_cadence() {
    let mut registry = HandlerRegistry::new();
    registry.register("sync_ads", |_ctx: HandlerContext<'_>| {
        HandlerOutcome::failure("meta api timeout")
    });
    let (scheduler, jobs, runs) = build(registry);

    let tenant = TenantId::new();
    let queue = JobQueue::new(jobs.clone());
    let job = queue
        .ensure_recurring_job(
            Some(tenant),
            "sync_ads",
            Cadence::Daily,
            serde_json::json!({"account": "act_123"}),
        )
        .unwrap();
    assert_eq!(job.max_retries, 3);

    // Three consecutive failures.
    for _ in 0..3 {
        rewind_to_due(&jobs, job.id);
        let summary = scheduler.tick();
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.failed, 1);
    }

    let attempts: Vec<u32> = runs
        .list_for_job(job.id)
        .unwrap()
        .iter()
        .map(|r| r.attempt_number)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    // Still active, error surfaced, and next_run_at is the next daily
    // occurrence rather than a backoff slot.
    let job = jobs.get(job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.last_error.as_deref(), Some("meta api timeout"));
    let delay = job.next_run_at - Utc::now();
    assert!(delay > Duration::hours(23) && delay <= Duration::hours(24));

    // The next natural occurrence starts a fresh attempt sequence.
    rewind_to_due(&jobs, job.id);
    scheduler.tick();
    let latest = runs.latest_for_job(job.id).unwrap().unwrap();
    assert_eq!(latest.attempt_number, 1);
}

#[test]
fn one_time_job_dies_after_exhaustion_and_never_runs_again() {
    let mut registry = HandlerRegistry::new();
    registry.register("scrape_competitor", |_ctx: HandlerContext<'_>| {
        HandlerOutcome::failure("target unreachable")
    });
    let (scheduler, jobs, runs) = build(registry);

    let queue = JobQueue::new(jobs.clone());
    let job = queue
        .queue_one_time_job(None, "scrape_competitor", serde_json::json!({"url": "https://x"}))
        .unwrap();

    for _ in 0..3 {
        rewind_to_due(&jobs, job.id);
        scheduler.tick();
    }

    let job_after = jobs.get(job.id).unwrap().unwrap();
    assert_eq!(job_after.status, JobStatus::Dead);
    assert_eq!(runs.list_for_job(job.id).unwrap().len(), 3);

    // Even with next_run_at forced into the past, a dead job is never due.
    rewind_to_due(&jobs, job.id);
    let summary = scheduler.tick();
    assert_eq!(summary.dispatched, 0);
    assert_eq!(runs.list_for_job(job.id).unwrap().len(), 3);
}

#[test]
fn stuck_run_is_recovered_and_rescheduled_with_first_backoff() {
    let mut registry = HandlerRegistry::new();
    registry.register("sync_ads", |_ctx: HandlerContext<'_>| HandlerOutcome::success());
    let (scheduler, jobs, runs) = build(registry);

    let job = Job::recurring(None, "sync_ads", Cadence::Daily, serde_json::json!({}))
        .with_next_run_at(Utc::now() + Duration::hours(6));
    let job_id = jobs.insert(job).unwrap();

    let mut abandoned = brandops_scheduler::Run::start(job_id, 1);
    abandoned.started_at = Utc::now() - Duration::minutes(45);
    let run_id = runs.insert(abandoned).unwrap();

    let summary = scheduler.tick();
    assert_eq!(summary.recovered, 1);

    let run = runs.get(run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.as_deref().unwrap().contains("recovered"));

    let job = jobs.get(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
    let delay = job.next_run_at - Utc::now();
    assert!(delay > Duration::minutes(4) && delay <= Duration::minutes(5));
}

#[test]
fn at_most_one_running_run_per_job_across_ticks() {
    let mut registry = HandlerRegistry::new();
    let flip = Arc::new(AtomicUsize::new(0));
    let flip_in_handler = flip.clone();
    registry.register("classify_content", move |_ctx: HandlerContext<'_>| {
        if flip_in_handler.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            HandlerOutcome::failure("llm rate limited")
        } else {
            HandlerOutcome::success()
        }
    });
    let (scheduler, jobs, runs) = build(registry);

    let job = Job::recurring(None, "classify_content", Cadence::Hourly, serde_json::json!({}));
    let job_id = jobs.insert(job).unwrap();

    for _ in 0..6 {
        rewind_to_due(&jobs, job_id);
        scheduler.tick();
        assert!(runs.running_count_for_job(job_id).unwrap() <= 1);
    }
    // Dispatch is sequential and the handler returned: nothing is left running.
    assert_eq!(runs.running_count_for_job(job_id).unwrap(), 0);
}

#[test]
fn handler_freshness_flow_success_then_failure() {
    let freshness_store = InMemoryFreshnessStore::arc();
    let tracker = FreshnessTracker::new(freshness_store.clone());
    let tenant = TenantId::new();
    let dataset = DatasetKey::new("ads");

    let fail = Arc::new(AtomicUsize::new(0));
    let fail_in_handler = fail.clone();
    let tracker_in_handler = tracker.clone();
    let dataset_in_handler = dataset.clone();

    let mut registry = HandlerRegistry::new();
    registry.register("sync_ads", move |ctx: HandlerContext<'_>| {
        tracker_in_handler.record_start(ctx.tenant_id, &dataset_in_handler, ctx.run_id);
        if fail_in_handler.load(Ordering::SeqCst) == 0 {
            tracker_in_handler.record_success(ctx.tenant_id, &dataset_in_handler, Some(25), ctx.run_id);
            HandlerOutcome::success_with(25)
        } else {
            tracker_in_handler.record_failure(
                ctx.tenant_id,
                &dataset_in_handler,
                "meta api timeout",
                ctx.run_id,
            );
            HandlerOutcome::failure("meta api timeout")
        }
    });
    let (scheduler, jobs, _runs) = build(registry);

    let job = Job::recurring(Some(tenant), "sync_ads", Cadence::Hourly, serde_json::json!({}));
    let job_id = jobs.insert(job).unwrap();

    // Successful run: dataset becomes fresh.
    scheduler.tick();
    assert!(tracker
        .check_is_fresh(Some(tenant), &dataset, Duration::hours(24))
        .unwrap());
    let record = tracker.get_freshness(Some(tenant), &dataset).unwrap().unwrap();
    assert_eq!(record.records_affected, Some(25));

    // Failing run: last_success_at survives, freshness still honest.
    fail.store(1, Ordering::SeqCst);
    rewind_to_due(&jobs, job_id);
    scheduler.tick();

    let record = tracker.get_freshness(Some(tenant), &dataset).unwrap().unwrap();
    assert_eq!(record.error_message.as_deref(), Some("meta api timeout"));
    assert!(record.last_success_at.is_some());
    // Fresh within a day (the earlier success), stale at a second's grain
    // is not something this test can rely on, but a never-succeeded
    // dataset must read stale regardless of the recent attempt:
    let never_succeeded = DatasetKey::from("thumbnails");
    tracker.record_start(Some(tenant), &never_succeeded, brandops_core::RunId::new());
    tracker.record_failure(
        Some(tenant),
        &never_succeeded,
        "thumbnail cdn down",
        brandops_core::RunId::new(),
    );
    assert!(!tracker
        .check_is_fresh(Some(tenant), &never_succeeded, Duration::hours(24))
        .unwrap());
}

#[test]
fn ensure_recurring_job_survives_worker_mutations() {
    let mut registry = HandlerRegistry::new();
    registry.register("sync_ads", |_ctx: HandlerContext<'_>| HandlerOutcome::success());
    let (scheduler, jobs, _runs) = build(registry);

    let tenant = TenantId::new();
    let queue = JobQueue::new(jobs.clone());
    let created = queue
        .ensure_recurring_job(Some(tenant), "sync_ads", Cadence::Daily, serde_json::json!({}))
        .unwrap();

    scheduler.tick();

    // Upsert after a run keeps the same job and does not reset its schedule.
    let ensured = queue
        .ensure_recurring_job(Some(tenant), "sync_ads", Cadence::Daily, serde_json::json!({}))
        .unwrap();
    assert_eq!(ensured.id, created.id);
    assert!(ensured.next_run_at > Utc::now());
    assert_eq!(jobs.list_for_tenant(Some(tenant)).unwrap().len(), 1);
}

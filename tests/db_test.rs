//! Store tests: submission, the claim protocol, lifecycle transitions,
//! runtime configuration, metrics and the control flag.
//!
//! Each test gets its own SQLite file in a temp directory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use queuectl::db::Db;
use queuectl::error::Error;
use queuectl::model::{JobId, MetricStatus, NewJob, RuntimeConfig, State};

async fn test_db() -> (tempfile::TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("queue.db")).await.unwrap();
    (dir, db)
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connects_and_migrates() {
    let (_dir, db) = test_db().await;
    assert!(db.health_check().await.is_ok());
    // Running migrations again is a no-op.
    db.migrate().await.unwrap();
}

#[tokio::test]
async fn submit_applies_defaults_and_get_returns_it() {
    let (_dir, db) = test_db().await;

    let job = db.submit(NewJob::new("echo hi")).await.unwrap();
    assert_eq!(job.state, State::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.priority, 5);
    assert!(job.run_at.is_none());

    let fetched = db.get_job(&job.id).await.unwrap();
    assert_eq!(fetched.id, job.id);
    assert_eq!(fetched.command, "echo hi");
    assert_eq!(fetched.state, State::Pending);
}

#[tokio::test]
async fn submit_takes_max_retries_from_runtime_config() {
    let (_dir, db) = test_db().await;
    db.set_setting("max_retries", "7").await.unwrap();

    let job = db.submit(NewJob::new("true")).await.unwrap();
    assert_eq!(job.max_retries, 7);

    let explicit = db.submit(NewJob::new("true").max_retries(1)).await.unwrap();
    assert_eq!(explicit.max_retries, 1);
}

#[tokio::test]
async fn resubmitting_an_id_overwrites() {
    let (_dir, db) = test_db().await;

    db.submit(NewJob::new("echo one").id("job1")).await.unwrap();
    db.submit(NewJob::new("echo two").id("job1").priority(1))
        .await
        .unwrap();

    let jobs = db.list_jobs(None).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].command, "echo two");
    assert_eq!(jobs[0].priority, 1);
}

#[tokio::test]
async fn invalid_submission_never_reaches_the_store() {
    let (_dir, db) = test_db().await;

    let err = db.submit(NewJob::new("   ")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(db.list_jobs(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_missing_job_is_not_found() {
    let (_dir, db) = test_db().await;
    let err = db.get_job(&JobId::from("nope")).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let (_dir, db) = test_db().await;

    db.submit(NewJob::new("echo a").id("A")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    db.submit(NewJob::new("echo b").id("B")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    db.submit(NewJob::new("echo c").id("C").priority(1))
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(job) = db.claim_next_due().await.unwrap() {
        assert_eq!(job.state, State::Processing);
        order.push(job.id.0);
    }
    assert_eq!(order, vec!["C", "A", "B"]);
}

#[tokio::test]
async fn scheduled_job_is_invisible_until_due() {
    let (_dir, db) = test_db().await;

    db.submit(
        NewJob::new("echo later")
            .id("later")
            .run_at(Utc::now() + chrono::Duration::hours(1)),
    )
    .await
    .unwrap();
    assert!(db.claim_next_due().await.unwrap().is_none());

    db.submit(
        NewJob::new("echo past")
            .id("past")
            .run_at(Utc::now() - chrono::Duration::seconds(1)),
    )
    .await
    .unwrap();
    let claimed = db.claim_next_due().await.unwrap().unwrap();
    assert_eq!(claimed.id, JobId::from("past"));

    assert_eq!(
        db.get_job(&JobId::from("later")).await.unwrap().state,
        State::Pending
    );
}

#[tokio::test]
async fn claim_on_empty_store_returns_none() {
    let (_dir, db) = test_db().await;
    assert!(db.claim_next_due().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_get_a_job_at_most_once() {
    let (_dir, db) = test_db().await;
    let db = Arc::new(db);
    db.submit(NewJob::new("true").id("only")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move { db.claim_next_due().await }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(
        db.get_job(&JobId::from("only")).await.unwrap().state,
        State::Processing
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claimers_partition_many_jobs() {
    let (_dir, db) = test_db().await;
    let db = Arc::new(db);
    for n in 0..20 {
        db.submit(NewJob::new("true").id(format!("job-{n}")))
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db = Arc::clone(&db);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = db.claim_next_due().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    // A claimer that loses a race stops early; drain what is left.
    while let Some(job) = db.claim_next_due().await.unwrap() {
        all.push(job.id);
    }

    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 20);
    assert_eq!(unique.len(), 20);
}

// ---------------------------------------------------------------------------
// Finish
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finish_moves_processing_job_and_records_attempts() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("true").id("j")).await.unwrap();
    let job = db.claim_next_due().await.unwrap().unwrap();

    let done = db.finish_job(&job.id, State::Completed, 1).await.unwrap();
    assert_eq!(done.state, State::Completed);
    assert_eq!(done.attempts, 1);
    assert!(done.updated_at >= job.updated_at);
}

#[tokio::test]
async fn retry_returns_job_to_pending() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("false").id("j")).await.unwrap();
    let job = db.claim_next_due().await.unwrap().unwrap();

    db.finish_job(&job.id, State::Pending, 1).await.unwrap();
    let again = db.claim_next_due().await.unwrap().unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.attempts, 1);
}

#[tokio::test]
async fn finish_rejects_jobs_not_in_processing() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("true").id("j")).await.unwrap();

    let err = db
        .finish_job(&JobId::from("j"), State::Completed, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(
        db.get_job(&JobId::from("j")).await.unwrap().state,
        State::Pending
    );
}

#[tokio::test]
async fn finish_rejects_failed_and_processing_targets() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("true").id("j")).await.unwrap();
    let job = db.claim_next_due().await.unwrap().unwrap();

    for to in [State::Failed, State::Processing] {
        let err = db.finish_job(&job.id, to, 1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }), "{to}");
    }
}

#[tokio::test]
async fn finishing_dead_writes_the_dead_letter() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("false").id("j").max_retries(1))
        .await
        .unwrap();
    let job = db.claim_next_due().await.unwrap().unwrap();

    db.finish_job(&job.id, State::Dead, 1).await.unwrap();

    let record = db.get_dead_letter(&job.id).await.unwrap().unwrap();
    assert_eq!(record.command, "false");
    assert_eq!(record.attempts, 1);
    assert_eq!(record.max_retries, 1);
    assert_eq!(db.dlq_count().await.unwrap(), 1);
}

#[tokio::test]
async fn counts_include_every_state() {
    let (_dir, db) = test_db().await;
    db.submit(NewJob::new("true").id("a")).await.unwrap();
    db.submit(NewJob::new("true").id("b")).await.unwrap();
    let claimed = db.claim_next_due().await.unwrap().unwrap();
    db.finish_job(&claimed.id, State::Completed, 1)
        .await
        .unwrap();

    let counts = db.counts_by_state().await.unwrap();
    assert_eq!(counts.len(), State::ALL.len());
    assert_eq!(counts[&State::Pending], 1);
    assert_eq!(counts[&State::Completed], 1);
    assert_eq!(counts[&State::Dead], 0);

    let pending = db.list_jobs(Some(State::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
}

// ---------------------------------------------------------------------------
// Runtime config
// ---------------------------------------------------------------------------

#[tokio::test]
async fn defaults_are_seeded_and_never_overwritten() {
    let (_dir, db) = test_db().await;
    assert_eq!(db.runtime_config().await.unwrap(), RuntimeConfig::default());

    let keys: Vec<String> = db
        .list_settings()
        .await
        .unwrap()
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(keys, vec!["base_backoff", "job_timeout_sec", "max_retries"]);

    db.set_setting("base_backoff", "3").await.unwrap();
    db.migrate().await.unwrap();
    assert_eq!(db.runtime_config().await.unwrap().base_backoff, 3);
}

#[tokio::test]
async fn settings_are_free_form_strings() {
    let (_dir, db) = test_db().await;

    assert!(db.get_setting("colour").await.unwrap().is_none());
    assert_eq!(db.get_setting_or("colour", "blue").await.unwrap(), "blue");

    db.set_setting("colour", "red").await.unwrap();
    assert_eq!(db.get_setting("colour").await.unwrap().as_deref(), Some("red"));

    // Unparsable tunables fall back to their default.
    db.set_setting("job_timeout_sec", "soon").await.unwrap();
    assert_eq!(db.runtime_config().await.unwrap().job_timeout_sec, 60);
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metrics_summary_and_timeseries() {
    let (_dir, db) = test_db().await;
    let id = JobId::from("m");

    db.record_metric(&id, Duration::from_secs(1), MetricStatus::Completed)
        .await
        .unwrap();
    db.record_metric(&id, Duration::from_secs(2), MetricStatus::Completed)
        .await
        .unwrap();
    db.record_metric(&id, Duration::from_millis(250), MetricStatus::Failed)
        .await
        .unwrap();

    let summary = db.metrics_summary().await.unwrap();
    assert_eq!(summary[&MetricStatus::Completed].jobs, 2);
    assert_eq!(summary[&MetricStatus::Completed].avg_time_sec, Some(1.5));
    assert_eq!(summary[&MetricStatus::Failed].jobs, 1);
    assert_eq!(summary[&MetricStatus::Failed].avg_time_sec, Some(0.25));

    let series = db
        .metrics_timeseries(chrono::Duration::minutes(60))
        .await
        .unwrap();
    assert!(!series.labels.is_empty());
    assert_eq!(series.completed.iter().sum::<u64>(), 2);
    assert_eq!(series.failed.iter().sum::<u64>(), 1);

    let for_job = db.metrics_for_job(&id).await.unwrap();
    assert_eq!(for_job.len(), 3);
    assert_eq!(for_job[2].status, MetricStatus::Failed);
}

#[tokio::test]
async fn empty_metrics() {
    let (_dir, db) = test_db().await;
    assert!(db.metrics_summary().await.unwrap().is_empty());
    let series = db
        .metrics_timeseries(chrono::Duration::minutes(60))
        .await
        .unwrap();
    assert!(series.labels.is_empty());
}

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_flag_is_durable_until_cleared() {
    let (dir, db) = test_db().await;
    assert!(!db.stop_requested().await.unwrap());

    db.request_stop().await.unwrap();
    db.close().await;

    // Another process opening the same file sees it.
    let other = Db::open(dir.path().join("queue.db")).await.unwrap();
    assert!(other.stop_requested().await.unwrap());

    other.clear_stop().await.unwrap();
    assert!(!other.stop_requested().await.unwrap());
}

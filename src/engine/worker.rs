//! Worker loop: one execution slot polling the shared store.
//!
//! idle -> claimed -> executing -> {completed, retry-scheduled, dead-lettered} -> idle.
//! Shutdown is only observed between jobs; a claimed job always reaches a
//! persisted state before the worker exits.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::exec::{self, ExecOutcome};
use super::policy::{self, Decision};
use crate::db::Db;
use crate::model::{Job, JobId, RuntimeConfig, State};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

/// Timing knobs for a worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep when no job is due.
    pub poll_interval: Duration,
    /// Gap between heartbeat writes, also kept while a job runs or backs off.
    pub heartbeat_interval: Duration,
    /// Back-off after a storage error before trying again.
    pub storage_retry_interval: Duration,
    /// Where per-job output sidecars go. `None` disables them. Defaults to
    /// `~/.queuectl/logs`.
    pub log_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            storage_retry_interval: Duration::from_secs(1),
            log_dir: crate::config::default_log_dir(),
        }
    }
}

/// Per-worker outcome counters, returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl std::ops::AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.completed += other.completed;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

pub struct Worker {
    id: String,
    pid: u32,
    hostname: String,
    db: Arc<Db>,
    config: WorkerConfig,
    shutdown: CancellationToken,
    stats: WorkerStats,
    last_heartbeat: Option<Instant>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        db: Arc<Db>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            pid: std::process::id(),
            hostname: super::hostname(),
            db,
            config,
            shutdown,
            stats: WorkerStats::default(),
            last_heartbeat: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Poll, execute and settle jobs until the shutdown token is cancelled.
    pub async fn run(mut self) -> WorkerStats {
        info!(worker = %self.id, "worker started");

        while !self.shutdown.is_cancelled() {
            self.heartbeat_if_due().await;

            match self.db.claim_next_due().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.idle(self.config.poll_interval).await,
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "claim failed, backing off");
                    self.idle(self.config.storage_retry_interval).await;
                }
            }
        }

        if let Err(e) = self.db.heartbeat_remove(&self.id).await {
            warn!(worker = %self.id, error = %e, "failed to remove heartbeat");
        }
        info!(
            worker = %self.id,
            completed = self.stats.completed,
            retried = self.stats.retried,
            dead_lettered = self.stats.dead_lettered,
            "worker stopped"
        );
        self.stats
    }

    async fn heartbeat_if_due(&mut self) {
        let due = self
            .last_heartbeat
            .is_none_or(|at| at.elapsed() >= self.config.heartbeat_interval);
        if due && self.beat().await {
            self.last_heartbeat = Some(Instant::now());
        }
    }

    async fn beat(&self) -> bool {
        match self
            .db
            .heartbeat_upsert(&self.id, self.pid, &self.hostname)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(worker = %self.id, error = %e, "heartbeat failed");
                false
            }
        }
    }

    /// Drive `fut` to completion, refreshing the heartbeat every interval so
    /// a long job or backoff doesn't make the worker look dead.
    async fn beating<F: Future>(&self, fut: F) -> F::Output {
        tokio::pin!(fut);
        let period = self.config.heartbeat_interval;
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                out = &mut fut => return out,
                _ = ticks.tick() => {
                    self.beat().await;
                }
            }
        }
    }

    /// Sleep for `d`, waking early on shutdown.
    async fn idle(&self, d: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(d) => {}
        }
    }

    async fn process(&mut self, job: Job) {
        let span = start_job_span(&self.id, &job.id);
        let work_span = span.clone();

        async {
            record_state_transition(&span, "pending", "processing");
            info!(id = %job.id, command = %job.command, attempts = job.attempts, "job claimed");

            let runtime = match self.db.runtime_config().await {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!(error = %e, "runtime config unavailable, using defaults");
                    RuntimeConfig::default()
                }
            };

            let execution = self
                .beating(exec::run_command(&job, runtime.job_timeout()))
                .await;
            metrics::job_duration_ms().record(
                execution.duration.as_secs_f64() * 1000.0,
                &[KeyValue::new("outcome", execution.outcome.label())],
            );
            if let Some(ref log_dir) = self.config.log_dir {
                if let Err(e) = exec::append_log(log_dir, &job, &execution).await {
                    warn!(id = %job.id, error = %e, "failed to write job log");
                }
            }

            let decision = policy::decide(
                execution.outcome.is_success(),
                job.attempts,
                job.max_retries,
                runtime.base_backoff,
            );
            span.record("job.attempt", decision.attempts());

            match decision {
                Decision::Complete { attempts } => {
                    info!(
                        id = %job.id,
                        attempts,
                        duration_ms = execution.duration.as_millis() as u64,
                        "job completed"
                    );
                    self.stats.completed += 1;
                }
                Decision::Retry { attempts, delay } => {
                    record_state_transition(&span, "processing", "failed");
                    warn!(
                        id = %job.id,
                        attempts,
                        max_retries = job.max_retries,
                        outcome = execution.outcome.label(),
                        delay_secs = delay.as_secs(),
                        stderr = %first_line(&execution.stderr),
                        "job failed, retrying after backoff"
                    );
                    self.beating(self.backoff(delay)).await;
                    self.stats.retried += 1;
                }
                Decision::Dead { attempts } => {
                    record_state_transition(&span, "processing", "failed");
                    error!(
                        id = %job.id,
                        attempts,
                        max_retries = job.max_retries,
                        outcome = execution.outcome.label(),
                        stderr = %first_line(&execution.stderr),
                        "job exhausted retries, dead-lettering"
                    );
                    self.stats.dead_lettered += 1;
                }
            }

            let to = decision.target_state();
            if !self.settle(&job.id, to, decision.attempts()).await {
                return;
            }
            record_state_transition(&span, decision_from(&execution.outcome), to.as_str());

            if let Some(status) = decision.metric_status() {
                if let Err(e) = self
                    .db
                    .record_metric(&job.id, execution.duration, status)
                    .await
                {
                    warn!(id = %job.id, error = %e, "failed to record metric");
                }
            }
        }
        .instrument(work_span)
        .await
    }

    /// Synchronous retry throttle. Shutdown cuts it short so the job can be
    /// handed back to `pending` before the worker exits.
    async fn backoff(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                debug!(worker = %self.id, "shutdown during backoff, requeueing now");
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Persist the job's outcome, retrying storage faults until the store
    /// accepts it. A lost write would strand the job in `processing`.
    async fn settle(&self, id: &JobId, to: State, attempts: u32) -> bool {
        loop {
            match self.db.finish_job(id, to, attempts).await {
                Ok(_) => return true,
                Err(e) if e.is_transient() => {
                    warn!(id = %id, error = %e, "failed to persist job outcome, retrying");
                    tokio::time::sleep(self.config.storage_retry_interval).await;
                }
                Err(e) => {
                    error!(id = %id, to = %to, error = %e, "job outcome rejected by store");
                    return false;
                }
            }
        }
    }
}

fn decision_from(outcome: &ExecOutcome) -> &'static str {
    if outcome.is_success() {
        "processing"
    } else {
        "failed"
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_dir_lives_under_home() {
        let config = WorkerConfig::default();
        assert_eq!(config.log_dir.is_some(), std::env::var_os("HOME").is_some());
        if let Some(dir) = config.log_dir {
            assert!(dir.ends_with(".queuectl/logs"));
        }
    }
}

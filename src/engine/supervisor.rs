//! Supervisor: starts N workers against one store and owns their shutdown.
//!
//! All workers share a single cancellation token. It is cancelled either
//! in-process ([`Supervisor::shutdown`]) or by another process setting the
//! durable stop flag, which a watcher task polls.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::worker::{Worker, WorkerConfig, WorkerStats};
use crate::db::Db;
use crate::error::{Error, Result};

pub struct Supervisor {
    shutdown: CancellationToken,
    worker_ids: Vec<String>,
    workers: Vec<JoinHandle<WorkerStats>>,
    watcher: JoinHandle<()>,
}

impl Supervisor {
    /// Spawn `count` workers. Clears any stale stop flag first so a previous
    /// `worker stop` doesn't immediately stop this pool.
    pub async fn start(db: Arc<Db>, count: usize, config: WorkerConfig) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidInput("worker count must be at least 1".to_string()));
        }
        db.clear_stop().await?;

        let shutdown = CancellationToken::new();
        let prefix = format!("{}-{}", super::hostname(), std::process::id());

        let mut worker_ids = Vec::with_capacity(count);
        let mut workers = Vec::with_capacity(count);
        for n in 1..=count {
            let worker = Worker::new(
                format!("{prefix}-{n}"),
                Arc::clone(&db),
                config.clone(),
                shutdown.clone(),
            );
            worker_ids.push(worker.id().to_string());
            workers.push(tokio::spawn(worker.run()));
        }

        let watcher = tokio::spawn(watch_stop_flag(
            Arc::clone(&db),
            shutdown.clone(),
            config.poll_interval,
        ));

        info!(count, "workers started");
        Ok(Self {
            shutdown,
            worker_ids,
            workers,
            watcher,
        })
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    /// Token shared by every worker; cancel it to begin draining.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal every worker to stop after its current job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every worker to drain and exit. Returns the summed counters.
    ///
    /// If a worker task fails, the rest are told to stop and still joined
    /// before the first failure is returned.
    pub async fn wait(self) -> Result<WorkerStats> {
        let mut total = WorkerStats::default();
        let mut failure = None;
        for handle in self.workers {
            match handle.await {
                Ok(stats) => total += stats,
                Err(e) => {
                    error!(error = %e, "worker task failed, stopping the rest");
                    self.shutdown.cancel();
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        self.shutdown.cancel();
        if let Err(e) = self.watcher.await {
            warn!(error = %e, "stop watcher task failed");
        }
        if let Some(e) = failure {
            return Err(Error::Other(format!("worker task failed: {e}")));
        }
        info!(
            completed = total.completed,
            retried = total.retried,
            dead_lettered = total.dead_lettered,
            "all workers stopped"
        );
        Ok(total)
    }
}

/// Cancel `shutdown` once the durable stop flag is set.
async fn watch_stop_flag(db: Arc<Db>, shutdown: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match db.stop_requested().await {
            Ok(true) => {
                info!("stop requested, draining workers");
                shutdown.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to read stop flag"),
        }
    }
}

//! Worker heartbeats. Written only by the worker that owns the id; read to
//! derive how many workers are alive.

use chrono::{DateTime, Utc};

use super::jobs::to_u32;
use crate::error::Result;
use crate::model::WorkerHeartbeat;

impl super::Db {
    /// Register or refresh a worker's heartbeat. `started_at` is kept from
    /// the first registration.
    pub(crate) async fn heartbeat_upsert(&self, worker_id: &str, pid: u32, hostname: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO worker_heartbeats (worker_id, pid, hostname, started_at, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(worker_id) DO UPDATE SET
                pid = excluded.pid,
                hostname = excluded.hostname,
                last_seen = excluded.last_seen",
        )
        .bind(worker_id)
        .bind(i64::from(pid))
        .bind(hostname)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub(crate) async fn heartbeat_remove(&self, worker_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM worker_heartbeats WHERE worker_id = ?1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Workers whose last heartbeat is within `freshness` of now.
    pub async fn active_worker_count(&self, freshness: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - freshness;
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM worker_heartbeats WHERE last_seen >= ?1")
                .bind(cutoff)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    /// Every heartbeat row, most recently seen first.
    pub async fn list_workers(&self) -> Result<Vec<WorkerHeartbeat>> {
        let rows: Vec<HeartbeatRow> = sqlx::query_as(
            "SELECT worker_id, pid, hostname, started_at, last_seen FROM worker_heartbeats
             ORDER BY last_seen DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkerHeartbeat {
                    pid: to_u32("pid", row.pid)?,
                    worker_id: row.worker_id,
                    hostname: row.hostname,
                    started_at: row.started_at,
                    last_seen: row.last_seen,
                })
            })
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct HeartbeatRow {
    worker_id: String,
    pid: i64,
    hostname: String,
    started_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

//! Dead letter sink: failure log for jobs that exhausted their retries,
//! and re-admission back into the main queue.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::Sqlite;
use tracing::info;

use super::jobs::{put_job_on, to_u32};
use crate::error::Result;
use crate::model::{DEFAULT_PRIORITY, DeadLetterRecord, Job, JobId, State};
use crate::telemetry::metrics;

impl super::Db {
    /// Record (insert or replace) a dead letter for `job`. The job row is
    /// left untouched.
    pub async fn record_dead_letter(&self, job: &Job) -> Result<DeadLetterRecord> {
        let record = record_dead_letter_on(&self.pool, job, Utc::now()).await?;
        metrics::dlq_operations().add(1, &[KeyValue::new("operation", "record")]);
        Ok(record)
    }

    /// All dead letters, newest failure first.
    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterRecord>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT id, command, attempts, max_retries, failed_at FROM dlq
             ORDER BY failed_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeadLetterRow::try_into_record).collect()
    }

    pub async fn get_dead_letter(&self, id: &JobId) -> Result<Option<DeadLetterRecord>> {
        let row: Option<DeadLetterRow> = sqlx::query_as(
            "SELECT id, command, attempts, max_retries, failed_at FROM dlq WHERE id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DeadLetterRow::try_into_record).transpose()
    }

    pub async fn dlq_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dlq")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Re-admit a dead letter as a fresh pending job: same id, command and
    /// max_retries, attempts reset to zero. The DLQ row is deleted.
    ///
    /// Returns `None` when there is no dead letter with that id.
    pub async fn retry_dead_letter(&self, id: &JobId) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        // Delete first so the transaction takes the write lock up front.
        let row: Option<DeadLetterRow> = sqlx::query_as(
            "DELETE FROM dlq WHERE id = ?1
             RETURNING id, command, attempts, max_retries, failed_at",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = row.map(DeadLetterRow::try_into_record).transpose()? else {
            return Ok(None);
        };

        let now = Utc::now();
        let job = Job {
            id: record.id,
            command: record.command,
            state: State::Pending,
            attempts: 0,
            max_retries: record.max_retries,
            priority: DEFAULT_PRIORITY,
            run_at: None,
            created_at: now,
            updated_at: now,
        };
        put_job_on(&mut *tx, &job).await?;
        tx.commit().await?;

        metrics::dlq_operations().add(1, &[KeyValue::new("operation", "retry")]);
        info!(id = %job.id, "dead letter re-queued");
        Ok(Some(job))
    }
}

pub(super) async fn record_dead_letter_on<'e, E>(
    executor: E,
    job: &Job,
    failed_at: DateTime<Utc>,
) -> Result<DeadLetterRecord>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO dlq (id, command, attempts, max_retries, failed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(job.id.as_str())
    .bind(&job.command)
    .bind(i64::from(job.attempts))
    .bind(i64::from(job.max_retries))
    .bind(failed_at)
    .execute(executor)
    .await?;

    Ok(DeadLetterRecord {
        id: job.id.clone(),
        command: job.command.clone(),
        attempts: job.attempts,
        max_retries: job.max_retries,
        failed_at,
    })
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: String,
    command: String,
    attempts: i64,
    max_retries: i64,
    failed_at: DateTime<Utc>,
}

impl DeadLetterRow {
    fn try_into_record(self) -> Result<DeadLetterRecord> {
        Ok(DeadLetterRecord {
            id: JobId(self.id),
            command: self.command,
            attempts: to_u32("attempts", self.attempts)?,
            max_retries: to_u32("max_retries", self.max_retries)?,
            failed_at: self.failed_at,
        })
    }
}

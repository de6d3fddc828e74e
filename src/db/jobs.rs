//! Job catalog operations: submit, claim, finish, and read projections.
//!
//! The claim is the queue's only mutual-exclusion point. It is a
//! compare-and-swap expressed as a row update keyed on id *and* the
//! expected state, so any number of workers can poll the same store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use sqlx::Sqlite;
use tracing::{debug, info};

use super::dlq::record_dead_letter_on;
use crate::error::{Error, Result};
use crate::model::{Job, JobId, NewJob, State};
use crate::telemetry::metrics;

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, priority, run_at, created_at, updated_at";

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: State, to: State) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl super::Db {
    /// Submit new work. Fills `max_retries` from runtime configuration when
    /// the caller didn't set one. Re-submitting an existing id overwrites it.
    pub async fn submit(&self, new: NewJob) -> Result<Job> {
        new.validate()?;

        let default_max_retries = match new.max_retries {
            Some(n) => n,
            None => self.runtime_config().await?.max_retries,
        };
        let job = new.into_job(default_max_retries, Utc::now());
        self.put_job(&job).await?;

        metrics::jobs_submitted().add(1, &[KeyValue::new("result", "ok")]);
        info!(
            id = %job.id,
            priority = job.priority,
            max_retries = job.max_retries,
            run_at = ?job.run_at,
            "job submitted"
        );
        Ok(job)
    }

    /// Insert or replace a job row verbatim.
    pub async fn put_job(&self, job: &Job) -> Result<()> {
        put_job_on(&self.pool, job).await
    }

    /// Get a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        get_job_on(&self.pool, id).await
    }

    /// List jobs, optionally filtered by state, oldest first.
    pub async fn list_jobs(&self, state: Option<State>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = match state {
            Some(state) => {
                sqlx::query_as(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC"
                ))
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Number of jobs in each state. Every state is present, zero included.
    pub async fn counts_by_state(&self) -> Result<BTreeMap<State, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts: BTreeMap<State, u64> = State::ALL.into_iter().map(|s| (s, 0)).collect();
        for (state, count) in rows {
            counts.insert(state.parse()?, count.max(0) as u64);
        }
        Ok(counts)
    }

    /// Claim the best-ranked due job, moving it `pending -> processing`.
    ///
    /// Returns `None` when nothing is due or when another worker won the
    /// race for the selected row. Losing a race is not an error.
    pub async fn claim_next_due(&self) -> Result<Option<Job>> {
        let now = Utc::now();

        let candidate: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?1)
             ORDER BY priority ASC, COALESCE(run_at, created_at) ASC, created_at ASC
             LIMIT 1"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = candidate else {
            metrics::claim_attempts().add(1, &[KeyValue::new("result", "empty")]);
            return Ok(None);
        };

        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = 'processing', updated_at = ?1
             WHERE id = ?2 AND state = 'pending'",
        )
        .bind(now)
        .bind(&row.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            debug!(id = %row.id, "claim lost to another worker");
            metrics::claim_attempts().add(1, &[KeyValue::new("result", "lost")]);
            return Ok(None);
        }

        metrics::claim_attempts().add(1, &[KeyValue::new("result", "won")]);
        record_transition(State::Pending, State::Processing);

        let mut job = row.try_into_job()?;
        job.state = State::Processing;
        job.updated_at = now;
        Ok(Some(job))
    }

    /// Move a claimed job out of `processing`, recording its attempt count.
    ///
    /// `to` is `Completed`, `Pending` (retry) or `Dead`. Dead-lettering writes
    /// the DLQ record in the same transaction as the state change.
    pub async fn finish_job(&self, id: &JobId, to: State, attempts: u32) -> Result<Job> {
        if to == State::Failed {
            // Failed is only a decision point; persisting it would strand the job.
            return Err(Error::InvalidTransition {
                from: State::Processing.to_string(),
                to: to.to_string(),
            });
        }
        validate_transition(State::Processing, to)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let rows_affected = sqlx::query(
            "UPDATE jobs SET state = ?1, attempts = ?2, updated_at = ?3
             WHERE id = ?4 AND state = 'processing'",
        )
        .bind(to.as_str())
        .bind(i64::from(attempts))
        .bind(now)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: State::Processing.to_string(),
                to: to.to_string(),
            });
        }

        let job = get_job_on(&mut *tx, id).await?;
        if to == State::Dead {
            record_dead_letter_on(&mut *tx, &job, now).await?;
        }
        tx.commit().await?;

        record_transition(State::Processing, to);
        if to == State::Dead {
            metrics::dlq_operations().add(1, &[KeyValue::new("operation", "record")]);
        }
        Ok(job)
    }
}

fn record_transition(from: State, to: State) {
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}

// ---------------------------------------------------------------------------
// Inner functions: generic over the executor so they run against the pool
// (auto-commit) or inside a transaction.
// ---------------------------------------------------------------------------

pub(super) async fn put_job_on<'e, E>(executor: E, job: &Job) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR REPLACE INTO jobs (id, command, state, attempts, max_retries, priority, run_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(job.id.as_str())
    .bind(&job.command)
    .bind(job.state.as_str())
    .bind(i64::from(job.attempts))
    .bind(i64::from(job.max_retries))
    .bind(job.priority)
    .bind(job.run_at)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn get_job_on<'e, E>(executor: E, id: &JobId) -> Result<Job>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<JobRow> =
        sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
            .bind(id.as_str())
            .fetch_optional(executor)
            .await?;

    row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
        .try_into_job()
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    priority: i64,
    run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            state: self.state.parse()?,
            attempts: to_u32("attempts", self.attempts)?,
            max_retries: to_u32("max_retries", self.max_retries)?,
            id: JobId(self.id),
            command: self.command,
            priority: self.priority,
            run_at: self.run_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(super) fn to_u32(column: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Other(format!("{column} out of range: {value}")))
}

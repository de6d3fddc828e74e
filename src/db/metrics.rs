//! Completion metrics: append-only rows plus read-side aggregation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    JobId, Metric, MetricStatus, MetricsSummary, MetricsTimeseries, StatusSummary,
};

impl super::Db {
    /// Append one completion metric.
    pub async fn record_metric(
        &self,
        job_id: &JobId,
        duration: Duration,
        status: MetricStatus,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics (job_id, duration, status, finished_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(job_id.as_str())
        .bind(duration.as_secs_f64())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Metrics recorded for one job, oldest first.
    pub async fn metrics_for_job(&self, job_id: &JobId) -> Result<Vec<Metric>> {
        let rows: Vec<MetricRow> = sqlx::query_as(
            "SELECT id, job_id, duration, status, finished_at FROM metrics
             WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Metric {
                    id: row.id,
                    job_id: JobId(row.job_id),
                    duration: row.duration,
                    status: row.status.parse()?,
                    finished_at: row.finished_at,
                })
            })
            .collect()
    }

    /// Job count and mean duration per status.
    pub async fn metrics_summary(&self) -> Result<MetricsSummary> {
        let rows: Vec<(String, i64, Option<f64>)> = sqlx::query_as(
            "SELECT status, COUNT(*), AVG(duration) FROM metrics GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = MetricsSummary::new();
        for (status, jobs, avg) in rows {
            summary.insert(
                status.parse()?,
                StatusSummary {
                    jobs: jobs.max(0) as u64,
                    avg_time_sec: avg.map(|a| (a * 100.0).round() / 100.0),
                },
            );
        }
        Ok(summary)
    }

    /// Per-minute completed/failed counts over the trailing `window`.
    pub async fn metrics_timeseries(&self, window: chrono::Duration) -> Result<MetricsTimeseries> {
        let since = Utc::now() - window;
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT substr(finished_at, 1, 16) AS minute, status, COUNT(*) FROM metrics
             WHERE finished_at >= ?1
             GROUP BY minute, status
             ORDER BY minute ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut buckets: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for (minute, status, count) in rows {
            let bucket = buckets.entry(minute).or_default();
            match status.parse::<MetricStatus>() {
                Ok(MetricStatus::Completed) => bucket.0 += count.max(0) as u64,
                Ok(MetricStatus::Failed) => bucket.1 += count.max(0) as u64,
                Err(_) => {}
            }
        }

        let mut series = MetricsTimeseries::default();
        for (minute, (completed, failed)) in buckets {
            series.labels.push(minute);
            series.completed.push(completed);
            series.failed.push(failed);
        }
        Ok(series)
    }
}

#[derive(sqlx::FromRow)]
struct MetricRow {
    id: i64,
    job_id: String,
    duration: f64,
    status: String,
    finished_at: DateTime<Utc>,
}

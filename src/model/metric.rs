//! Completion metrics and their read-side aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::job::JobId;
use crate::error::{Error, Result};

/// Terminal outcome recorded for a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Completed,
    Failed,
}

impl MetricStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricStatus::Completed => "completed",
            MetricStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "completed" => Ok(MetricStatus::Completed),
            "failed" => Ok(MetricStatus::Failed),
            _ => Err(Error::Other(format!("unknown metric status: {s}"))),
        }
    }
}

/// Append-only record of one finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub job_id: JobId,
    /// Wall-clock execution time in seconds.
    pub duration: f64,
    pub status: MetricStatus,
    pub finished_at: DateTime<Utc>,
}

/// Count and mean duration for one status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub jobs: u64,
    /// Mean duration in seconds, rounded to two decimals. None with no samples.
    pub avg_time_sec: Option<f64>,
}

/// Per-status aggregate over every recorded metric.
pub type MetricsSummary = BTreeMap<MetricStatus, StatusSummary>;

/// Per-minute completion/failure counts, aligned by index with `labels`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTimeseries {
    /// Minute buckets formatted `YYYY-MM-DDTHH:MM`, ascending.
    pub labels: Vec<String>,
    pub completed: Vec<u64>,
    pub failed: Vec<u64>,
}

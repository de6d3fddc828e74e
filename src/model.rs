//! Core data model.
//!
//! A job is a shell command waiting to run. It has identity, priority, an
//! optional earliest start time and a lifecycle state. Dead-lettered jobs,
//! worker heartbeats and completion metrics are the supporting records.

pub mod dlq;
pub mod job;
pub mod metric;
pub mod settings;
pub mod worker;

pub use dlq::DeadLetterRecord;
pub use job::{DEFAULT_PRIORITY, Job, JobId, NewJob, State};
pub use metric::{Metric, MetricStatus, MetricsSummary, MetricsTimeseries, StatusSummary};
pub use settings::RuntimeConfig;
pub use worker::WorkerHeartbeat;

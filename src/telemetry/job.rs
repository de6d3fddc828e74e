//! Job execution span helpers.
//!
//! Provides span creation and state-transition recording for jobs
//! flowing through a worker.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one execution of a job.
///
/// The `job.attempt` field is declared empty and filled in once the
/// outcome is known.
pub fn start_job_span(worker_id: &str, job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.execute",
        "worker.id" = worker_id,
        "job.id" = %job_id,
        "job.attempt" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

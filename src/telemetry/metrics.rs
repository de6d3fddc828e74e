//! Metric instrument factories for queuectl.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"queuectl"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for queuectl instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("queuectl")
}

/// Counter: number of jobs submitted.
/// Labels: `result` ("ok").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.jobs.submitted")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: claim attempts by outcome.
/// Labels: `result` ("won" | "lost" | "empty").
pub fn claim_attempts() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.jobs.claim_attempts")
        .with_description("Number of claim attempts against the job catalog")
        .build()
}

/// Counter: dead letter sink operations.
/// Labels: `operation` ("record" | "retry").
pub fn dlq_operations() -> Counter<u64> {
    meter()
        .u64_counter("queuectl.dlq.operations")
        .with_description("Number of dead letter queue operations")
        .build()
}

/// Histogram: job execution wall-clock time in milliseconds.
/// Labels: `outcome` ("success" | "failure" | "timeout" | "error").
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("queuectl.jobs.duration_ms")
        .with_description("Job execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

//! Integration tests for telemetry initialization and span helpers.

use queuectl::model::JobId;

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process, so a second
    // init in the same binary returns Err rather than panicking.
    let config = queuectl::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "queuectl-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = queuectl::telemetry::init_telemetry(config);
}

#[test]
fn job_span_creates_and_records_transition() {
    let id = JobId::generate();
    let span = queuectl::telemetry::job::start_job_span("host-1-1", &id);
    span.record("job.attempt", 1u32);
    queuectl::telemetry::job::record_state_transition(&span, "pending", "processing");
}

#[test]
fn metric_instruments_are_usable_without_a_provider() {
    use opentelemetry::KeyValue;
    use queuectl::telemetry::metrics;

    metrics::jobs_submitted().add(1, &[KeyValue::new("result", "ok")]);
    metrics::claim_attempts().add(1, &[KeyValue::new("result", "empty")]);
    metrics::job_duration_ms().record(12.5, &[KeyValue::new("outcome", "success")]);
}

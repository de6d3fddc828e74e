//! Tracing and OpenTelemetry setup for the CLI and worker processes.
//!
//! Every process logs to stderr. When an OTLP endpoint is configured, spans,
//! metrics and log records are also exported, tagged with the host and pid
//! so signals from several `worker start` processes can be told apart.

pub mod job;
pub mod metrics;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::config::Config;
use crate::error::{Error, Result};

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. "http://localhost:4317". `None` = stderr only.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            endpoint: config.otel_endpoint.clone(),
            service_name: env!("CARGO_PKG_NAME").to_string(),
            log_level: config.log_level.clone(),
        }
    }
}

/// Keeps the OTLP pipelines alive. Hold it for the life of the process;
/// dropping it flushes and shuts them down.
pub struct TelemetryGuard {
    otlp: Option<OtlpProviders>,
}

struct OtlpProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(otlp) = self.otlp.take() {
            // Logs first so shutdown messages from the other two still go out.
            let _ = otlp.logger.shutdown();
            let _ = otlp.meter.shutdown();
            let _ = otlp.tracer.shutdown();
        }
    }
}

/// Install the global subscriber and, with an endpoint, the OTLP exporters.
///
/// # Errors
///
/// Fails if an exporter can't be built or a global subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let stderr = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    let Some(endpoint) = config.endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr)
            .try_init()
            .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;
        return Ok(TelemetryGuard { otlp: None });
    };

    let otlp = build_otlp(&endpoint, resource(config.service_name))?;
    opentelemetry::global::set_meter_provider(otlp.meter.clone());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr)
        .with(tracing_opentelemetry::layer().with_tracer(otlp.tracer.tracer("queuectl")))
        .with(opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&otlp.logger))
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    tracing::debug!(endpoint = %endpoint, "exporting telemetry over OTLP");
    Ok(TelemetryGuard { otlp: Some(otlp) })
}

/// Identity attached to every exported signal.
fn resource(service_name: String) -> Resource {
    Resource::builder()
        .with_service_name(service_name)
        .with_attributes([
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("host.name", crate::engine::hostname()),
            KeyValue::new("process.pid", i64::from(std::process::id())),
        ])
        .build()
}

fn build_otlp(endpoint: &str, resource: Resource) -> Result<OtlpProviders> {
    use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig as _};

    let exporter_err = |signal: &str, e: opentelemetry_otlp::ExporterBuildError| {
        Error::Config(format!("failed to create OTLP {signal} exporter for {endpoint}: {e}"))
    };

    let spans = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_err("span", e))?;
    let metrics = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_err("metric", e))?;
    let logs = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_err("log", e))?;

    Ok(OtlpProviders {
        tracer: SdkTracerProvider::builder()
            .with_batch_exporter(spans)
            .with_resource(resource.clone())
            .build(),
        meter: SdkMeterProvider::builder()
            .with_periodic_exporter(metrics)
            .with_resource(resource.clone())
            .build(),
        logger: SdkLoggerProvider::builder()
            .with_batch_exporter(logs)
            .with_resource(resource)
            .build(),
    })
}

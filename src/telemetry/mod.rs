//! Telemetry setup for processes that serve a queue.
//!
//! Diagnostics always go to stderr through a fmt layer, leaving stdout to
//! the CLI's own output. With an OTLP endpoint the same subscriber also
//! exports spans and logs, and a global meter provider picks up the queue
//! metrics. Every exported signal carries the queue it came from as
//! resource attributes. Library code never calls this: embedding
//! applications and the `dirq` binary do.

pub mod job;
pub mod metrics;

use std::path::PathBuf;

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

use crate::error::{Error, Result};
use crate::model::Retention;

/// Resource attribute naming the queue base directory.
pub const QUEUE_BASE_ATTRIBUTE: &str = "dirq.queue.base_dir";
/// Resource attribute carrying the retention policy, e.g. `success,failed`.
pub const RETENTION_ATTRIBUTE: &str = "dirq.queue.retention";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint (e.g. "http://localhost:4317"). `None` logs to
    /// stderr only.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset (e.g. "info", "dirq=debug").
    pub log_level: String,
    /// Queue served by this process, if any.
    pub queue_base: Option<PathBuf>,
    pub retention: Option<Retention>,
}

impl TelemetryConfig {
    /// Service identity plus the queue attributes that are set.
    pub fn resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))];
        if let Some(base) = &self.queue_base {
            attributes.push(KeyValue::new(QUEUE_BASE_ATTRIBUTE, base.display().to_string()));
        }
        if let Some(retention) = self.retention {
            attributes.push(KeyValue::new(RETENTION_ATTRIBUTE, retention.to_string()));
        }
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes(attributes)
            .build()
    }
}

/// The three OTLP pipelines, built together against one endpoint.
struct Exporters {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl Exporters {
    fn build(endpoint: &str, resource: Resource) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig as _;

        let spans = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("span", e))?;
        let metrics = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("metric", e))?;
        let logs = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| exporter_error("log", e))?;

        Ok(Self {
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
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Other(format!("failed to create OTLP {signal} exporter: {e}"))
}

/// Keeps the OTLP pipelines running; flushes and shuts them down on drop.
pub struct TelemetryGuard {
    exporters: Option<Exporters>,
}

impl TelemetryGuard {
    /// Push out everything buffered so far, e.g. before a short-lived
    /// command exits.
    pub fn force_flush(&self) {
        if let Some(exporters) = &self.exporters {
            let _ = exporters.tracer.force_flush();
            let _ = exporters.meter.force_flush();
            let _ = exporters.logger.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(exporters) = self.exporters.take() {
            let _ = exporters.logger.shutdown();
            let _ = exporters.meter.shutdown();
            let _ = exporters.tracer.shutdown();
        }
    }
}

/// Install the global tracing subscriber (and, with an endpoint, the OTLP
/// pipelines). Hold the returned guard for the life of the process.
///
/// # Errors
///
/// Returns an error if an OTLP exporter fails to build or a global
/// subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let exporters = config
        .endpoint
        .as_deref()
        .map(|endpoint| Exporters::build(endpoint, config.resource()))
        .transpose()?;

    let trace_layer = exporters
        .as_ref()
        .map(|e| tracing_opentelemetry::layer().with_tracer(e.tracer.tracer("dirq")));
    let log_layer = exporters
        .as_ref()
        .map(|e| opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&e.logger));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(trace_layer)
        .with(log_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to init tracing subscriber: {e}")))?;

    if let Some(exporters) = &exporters {
        opentelemetry::global::set_meter_provider(exporters.meter.clone());
        tracing::debug!(
            endpoint = config.endpoint.as_deref().unwrap_or_default(),
            "OTLP export enabled"
        );
    }

    Ok(TelemetryGuard { exporters })
}

#[cfg(test)]
mod tests {
    use opentelemetry::Key;

    use super::*;

    fn config() -> TelemetryConfig {
        TelemetryConfig {
            endpoint: None,
            service_name: "dirq-worker".to_string(),
            log_level: "info".to_string(),
            queue_base: Some(PathBuf::from("/var/spool/dirq")),
            retention: Some(Retention::SUCCESS | Retention::FAILED),
        }
    }

    fn attribute(resource: &Resource, key: &'static str) -> Option<String> {
        resource
            .get(&Key::from_static_str(key))
            .map(|v| v.as_str().into_owned())
    }

    #[test]
    fn resource_names_the_served_queue() {
        let resource = config().resource();
        assert_eq!(attribute(&resource, "service.name").as_deref(), Some("dirq-worker"));
        assert_eq!(
            attribute(&resource, QUEUE_BASE_ATTRIBUTE).as_deref(),
            Some("/var/spool/dirq")
        );
        assert_eq!(
            attribute(&resource, RETENTION_ATTRIBUTE).as_deref(),
            Some("success,failed")
        );
    }

    #[test]
    fn resource_omits_unset_queue_attributes() {
        let resource = TelemetryConfig {
            queue_base: None,
            retention: None,
            ..config()
        }
        .resource();
        assert_eq!(attribute(&resource, QUEUE_BASE_ATTRIBUTE), None);
        assert_eq!(attribute(&resource, RETENTION_ATTRIBUTE), None);
        assert!(attribute(&resource, "service.version").is_some());
    }
}

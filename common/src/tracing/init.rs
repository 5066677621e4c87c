use crate::error::{ChatError, Result};
use opentelemetry::{trace::TracerProvider as _, KeyValue};
use opentelemetry_sdk::Resource;
use std::env;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// flushes pending spans when dropped
pub struct OtelGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl OtelGuard {
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            // flush remaining traces on shutdown
            if let Err(e) = provider.shutdown() {
                eprintln!("error shutting down tracer provider: {}", e);
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

fn flag_enabled(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn otlp_endpoint() -> Option<String> {
    let enabled = env::var("BRAINBAY_ENABLE_TRACING")
        .map(|v| flag_enabled(&v))
        .unwrap_or(false);
    if !enabled {
        return None;
    }

    env::var("PHOENIX_COLLECTOR_ENDPOINT")
        .or_else(|_| env::var("OTEL_EXPORTER_OTLP_ENDPOINT"))
        .ok()
        .filter(|s| !s.is_empty())
}

/// identifies this process to the collector
fn service_resource(service_name: &str, environment: &str) -> Resource {
    Resource::builder_empty()
        .with_attributes([
            KeyValue::new("service.name", service_name.to_string()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", environment.to_string()),
        ])
        .build()
}

// colored output only where a person is likely reading it
fn use_ansi(environment: &str) -> bool {
    !environment.eq_ignore_ascii_case("production")
}

/// installs the global subscriber; exports spans over otlp when enabled
///
/// `environment` tags the otlp resource and turns off ansi colors in production
pub fn init_tracing(service_name: &str, environment: &str) -> Result<OtelGuard> {
    let Some(endpoint) = otlp_endpoint() else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_ansi(use_ansi(environment)))
            .with(env_filter())
            .try_init()
            .map_err(|e| ChatError::Tracing(e.to_string()))?;

        tracing::info!(
            environment,
            "console logging initialized for {}",
            service_name
        );
        return Ok(OtelGuard {
            tracer_provider: None,
        });
    };

    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()
        .map_err(|e| ChatError::Tracing(format!("span exporter for {}: {}", endpoint, e)))?;

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(service_resource(service_name, environment))
        .build();

    let telemetry =
        tracing_opentelemetry::layer().with_tracer(provider.tracer(service_name.to_string()));

    tracing_subscriber::registry()
        .with(telemetry)
        .with(tracing_subscriber::fmt::layer().with_ansi(use_ansi(environment)))
        .with(env_filter())
        .try_init()
        .map_err(|e| ChatError::Tracing(e.to_string()))?;

    tracing::info!(
        environment,
        %endpoint,
        "exporting spans for {}",
        service_name
    );

    Ok(OtelGuard {
        tracer_provider: Some(provider),
    })
}

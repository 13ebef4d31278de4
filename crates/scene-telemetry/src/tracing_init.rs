//! Tracing bootstrap: `tracing-subscriber` fmt layer exactly as the
//! teacher's `main.rs` (`LOG_LEVEL` env var, `.init()`), extended with an
//! optional OTLP layer when `OTEL_EXPORTER_OTLP_ENDPOINT` is configured.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Holds the OTLP provider so the caller can flush it on shutdown; dropping
/// it silently would lose in-flight spans.
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl TracingGuard {
    /// Flushes and shuts down the OTLP exporter, if one was installed.
    /// Part of the Supervisor's drain sequence (spec.md §4.9).
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "failed to shut down tracer provider cleanly");
            }
        }
    }
}

/// Initializes the global tracing subscriber. `otlp_endpoint` is `None`
/// unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set, in which case tracing stays
/// stdout-only (spec.md §4.8).
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) -> TracingGuard {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer();

    match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_endpoint(endpoint)
                .build()
                .expect("failed to build OTLP span exporter");

            let provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    Resource::builder()
                        .with_attribute(KeyValue::new("service.name", service_name.to_owned()))
                        .build(),
                )
                .build();
            let tracer = provider.tracer(service_name.to_owned());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .init();

            TracingGuard { provider: Some(provider) }
        }
        None => {
            tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
            TracingGuard { provider: None }
        }
    }
}

//! Observability wiring.
//!
//! Installs a `tracing-subscriber` registry with:
//!
//! - an `EnvFilter` (`info`, or `debug` with `--debug`; `RUST_LOG` wins);
//! - a console fmt layer, JSON when `PULSE_ACTIONS_LOG_FORMAT=json`;
//! - an OpenTelemetry layer exporting spans over OTLP/gRPC when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
//!
//! The returned [`Telemetry`] owns the tracer provider; call
//! [`Telemetry::shutdown`] before exiting so pending spans are flushed.

use anyhow::Context;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const SERVICE_NAME: &str = "pulse-actions";
const LOG_FORMAT_VAR: &str = "PULSE_ACTIONS_LOG_FORMAT";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Noisy dependencies are kept at `warn`.
const QUIET_TARGETS: [&str; 4] = ["lapin", "amq_protocol", "reqwest", "hyper"];

/// Keeps span export alive until [`Telemetry::shutdown`].
pub struct Telemetry {
    provider: Option<TracerProvider>,
}

impl Telemetry {
    /// Flushes and stops span export.
    pub fn shutdown(self) {
        if let Some(provider) = self.provider {
            if let Err(err) = provider.shutdown() {
                eprintln!("Failed to shut down tracer provider: {err}");
            }
        }
    }
}

fn console_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Builds the default filter directive for the console level.
pub fn default_directive(debug: bool) -> String {
    let mut directive = console_level(debug).to_string();
    for target in QUIET_TARGETS {
        directive.push_str(&format!(",{target}=warn"));
    }
    directive
}

/// Installs the global subscriber. Must run inside the Tokio runtime.
pub fn init(debug: bool) -> anyhow::Result<Telemetry> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(debug)))
        .context("Invalid log filter")?;

    let json = std::env::var(LOG_FORMAT_VAR)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json().with_current_span(true)), None)
    } else {
        (None, Some(fmt::layer().with_target(true)))
    };

    let provider = match std::env::var(OTLP_ENDPOINT_VAR) {
        Ok(endpoint) if !endpoint.is_empty() => Some(tracer_provider(&endpoint)?),
        _ => None,
    };
    let otel_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let level = console_level(debug);
    tracing::info!(
        level,
        json,
        opentelemetry_enabled = provider.is_some(),
        "Logging initialised"
    );

    Ok(Telemetry { provider })
}

fn tracer_provider(endpoint: &str) -> anyhow::Result<TracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("Failed to build OTLP span exporter")?;

    Ok(TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            SERVICE_NAME,
        )]))
        .build())
}

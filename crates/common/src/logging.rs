use crate::config::{Environment, LogLevel};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// OpenTelemetry bridge layer, boxed so the tracer type stays out of signatures.
pub(crate) type OtelLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize tracing with pretty output in development and JSON lines in
/// production. `RUST_LOG` takes precedence over `log_level` when set.
///
/// Spans are forwarded to whatever global tracer provider is installed, so
/// calling `TelemetryGuard::init` instead also gets them exported.
pub fn setup_logging(log_level: LogLevel, environment: Environment) {
    // A second call (tests, embedded use) keeps the first subscriber
    if let Err(e) = install_subscriber(log_level, environment, tracing_opentelemetry::layer().boxed())
    {
        eprintln!("Logging already initialized: {}", e);
    }
}

pub(crate) fn install_subscriber(
    log_level: LogLevel,
    environment: Environment,
    otel_layer: OtelLayer,
) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));

    let fmt_layer = match environment {
        Environment::Production => fmt::layer().json().with_level(true).boxed(),
        Environment::Development => fmt::layer().pretty().with_ansi(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
}

use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process-wide tracing subscriber without OpenTelemetry export.
///
/// Pretty output in development, JSON lines in production. Filtering follows
/// `RUST_LOG` and defaults to `info`. Use [`crate::TelemetryGuard::init`]
/// instead when an OTLP collector is configured; only one of the two may run.
pub fn setup_logging(environment: Environment) {
    let registry = tracing_subscriber::registry().with(env_filter());

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}

pub(crate) fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

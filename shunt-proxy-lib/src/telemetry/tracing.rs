use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::error::{ProxyError, Result};

/// Build the filter directive from configuration
///
/// `RUST_LOG`, when set, takes precedence over this.
pub fn filter_directive(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> String {
    format!("{},opentelemetry={}", logging.level, telemetry.otel_log_level)
}

/// Install the global fmt subscriber
pub fn init_tracing(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter_directive(logging, telemetry)));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(logging.show_target);

    let subscriber = Registry::default().with(env_filter).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ProxyError::Telemetry(format!("Failed to set global tracing subscriber: {e}")))
}

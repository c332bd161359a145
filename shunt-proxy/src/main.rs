#![forbid(unsafe_code)]

use clap::Parser;
use shunt_proxy_lib::config::{load_from_path, Config, LoggingConfig, TelemetryConfig};
use shunt_proxy_lib::proxy::shutdown_signal;
use shunt_proxy_lib::telemetry::{init_metrics, init_tracing, start_observability_server, Metrics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reverse proxy that reroutes rate-exceeding identities")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", env = "SHUNT_CONFIG", default_value = "config/shunt.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            let _ = init_tracing(&LoggingConfig::default(), &TelemetryConfig::default());
            error!(%err, path = %cli.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }
    info!(?cfg.listen, backends = cfg.backends.len(), overflow = %cfg.overflow, "configuration loaded");

    let metrics = start_telemetry(&cfg);

    if let Err(err) = shunt_proxy_lib::run(Arc::new(cfg), metrics).await {
        error!(%err, "proxy exited with error");
        std::process::exit(1);
    }
}

/// Metrics are only collected when the observability port is configured
fn start_telemetry(cfg: &Config) -> Option<Arc<Metrics>> {
    let port = cfg.telemetry.metrics_port?;
    let (metrics, registry) = match init_metrics() {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "failed to initialize metrics, continuing without them");
            return None;
        }
    };
    let shutdown = match shutdown_signal() {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "observability server disabled");
            return Some(metrics);
        }
    };
    tokio::spawn(async move {
        if let Err(err) = start_observability_server(port, registry, shutdown).await {
            error!(%err, "observability server exited with error");
        }
    });
    Some(metrics)
}

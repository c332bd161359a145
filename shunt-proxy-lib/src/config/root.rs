use serde::Deserialize;
use std::net::SocketAddr;

use super::backend::{Backend, BackendPoolConfig};
use super::headers::InjectedHeaders;
use super::rate_limit::RateLimitConfig;
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;
use super::traffic::{BypassConfig, LimitsConfig, TrafficConfig};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address and port to listen on
    /// Example: "0.0.0.0:9000" or "127.0.0.1:8080"
    pub listen: SocketAddr,
    /// Default destination pool
    /// Identities without an override are sent to a random member
    /// At least one backend is required
    pub backends: Vec<Backend>,
    /// Destination for identities that exceeded the rate limit
    pub overflow: Backend,
    /// Sliding-window thresholds and ban period
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Application ids that always use the default pool
    #[serde(default)]
    pub bypass: BypassConfig,
    /// Per-appid traffic export
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Names of the headers injected upstream
    #[serde(default)]
    pub headers: InjectedHeaders,
    /// Request limits
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Timeout configuration
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Upstream connection pool
    #[serde(default)]
    pub backend_pool: BackendPoolConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Minimal configuration with defaults for everything optional
    pub fn new(listen: SocketAddr, backends: Vec<Backend>, overflow: Backend) -> Self {
        Self {
            listen,
            backends,
            overflow,
            rate_limit: RateLimitConfig::default(),
            bypass: BypassConfig::default(),
            traffic: TrafficConfig::default(),
            headers: InjectedHeaders::default(),
            limits: LimitsConfig::default(),
            timeout: TimeoutConfig::default(),
            backend_pool: BackendPoolConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

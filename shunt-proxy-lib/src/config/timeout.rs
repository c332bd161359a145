use serde::Deserialize;
use std::time::Duration;

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Upstream connection timeout in milliseconds
    /// Default: 5000 (5 seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
    /// Maximum time to wait for the upstream response headers, in milliseconds
    /// Failures are not retried; a timeout is answered with 504
    /// Default: 30000 (30 seconds)
    #[serde(default = "default_upstream_timeout")]
    pub upstream_ms: u64,
    /// Maximum time a request waits for the routing snapshot, in milliseconds
    /// On expiry the request falls back to the default pool
    /// Default: 1000 (1 second)
    #[serde(default = "default_exchange_timeout")]
    pub exchange_ms: u64,
    /// Graceful shutdown timeout in seconds
    /// Default: 30
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_secs: u64,
    /// HTTP/1.1 keep-alive configuration for upstream connections
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_millis(self.upstream_ms)
    }

    pub fn exchange(&self) -> Duration {
        Duration::from_millis(self.exchange_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            upstream_ms: default_upstream_timeout(),
            exchange_ms: default_exchange_timeout(),
            shutdown_secs: default_shutdown_timeout(),
            keep_alive: KeepAliveConfig::default(),
        }
    }
}

/// TCP keep-alive configuration for pooled upstream connections
#[derive(Debug, Deserialize, Clone)]
pub struct KeepAliveConfig {
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keep-alive timeout in seconds
    /// Default: 60 seconds
    #[serde(default = "default_keep_alive_timeout")]
    pub timeout_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self { enabled: true, timeout_secs: default_keep_alive_timeout() }
    }
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_upstream_timeout() -> u64 {
    30000
}

fn default_exchange_timeout() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_timeout() -> u64 {
    60
}

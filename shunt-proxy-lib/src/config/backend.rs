use serde::Deserialize;

/// HTTP version preference for upstream connections
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendHttpVersion {
    #[default]
    Http11,
    Http2,
}

/// Upstream server configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Upstream address (host:port format)
    /// Example: "backend-1:9001" or "10.0.0.1:9001"
    pub address: String,
    /// HTTP version to use when connecting to this upstream
    /// Options: "http11", "http2"
    /// Default: "http11"
    #[serde(default)]
    pub http_version: Option<BackendHttpVersion>,
}

impl Backend {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), http_version: None }
    }

    pub fn version(&self) -> BackendHttpVersion {
        self.http_version.unwrap_or_default()
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

/// Configuration for the upstream connection pool
///
/// Connection pooling reuses TCP connections to upstreams instead of
/// opening a new one for every forwarded request.
#[derive(Clone, Debug, Deserialize)]
pub struct BackendPoolConfig {
    /// Idle timeout in seconds for pooled connections
    /// Default: 90 seconds
    #[serde(default = "default_backend_pool_idle_timeout")]
    pub idle_timeout: u64,

    /// Maximum number of idle connections to maintain per host
    /// 0 = unlimited (hyper default)
    /// Default: 0
    #[serde(default)]
    pub pool_max_idle_per_host: usize,
}

impl Default for BackendPoolConfig {
    fn default() -> Self {
        Self { idle_timeout: default_backend_pool_idle_timeout(), pool_max_idle_per_host: 0 }
    }
}

fn default_backend_pool_idle_timeout() -> u64 {
    90
}

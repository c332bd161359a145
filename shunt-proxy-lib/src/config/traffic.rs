use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Bypass allow-list configuration
///
/// Requests whose `appid` is listed here, or whose client address is in
/// `source_ips`, always go to the default pool, whatever override their
/// identity carries. Neither kind is counted against the identity.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct BypassConfig {
    /// Inline list of application ids
    #[serde(default)]
    pub appids: Vec<String>,
    /// Optional list file: one appid per line, lines starting with '#' ignored
    /// Entries are merged with `appids` at load time
    #[serde(default)]
    pub appids_file: Option<PathBuf>,
    /// Trusted client IP addresses, matched against the connection peer
    #[serde(default)]
    pub source_ips: Vec<String>,
    /// Optional list file merged into `source_ips`
    #[serde(default)]
    pub source_ips_file: Option<PathBuf>,
}

/// Per-appid traffic aggregation and export
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TrafficConfig {
    /// DogStatsD sink address (host:port, UDP)
    /// Default: None (traffic counter disabled)
    #[serde(default)]
    pub statsd_addr: Option<String>,
    /// Reporting period in seconds
    /// Default: 10
    #[serde(default = "default_flush_secs")]
    pub flush_secs: u64,
    /// Application ids whose traffic is aggregated; everything else is ignored
    #[serde(default)]
    pub monitored_appids: Vec<String>,
    /// Optional list file merged into `monitored_appids`
    #[serde(default)]
    pub monitored_appids_file: Option<PathBuf>,
    /// Prefix prepended to every metric name
    /// Default: "shunt."
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Constant tags attached to every metric
    /// Default: ["module:shunt"]
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
}

impl TrafficConfig {
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_secs)
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            statsd_addr: None,
            flush_secs: default_flush_secs(),
            monitored_appids: Vec::new(),
            monitored_appids_file: None,
            namespace: default_namespace(),
            tags: default_tags(),
        }
    }
}

fn default_flush_secs() -> u64 {
    10
}

fn default_namespace() -> String {
    "shunt.".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["module:shunt".to_string()]
}

/// Request limits
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LimitsConfig {
    /// Maximum buffered request body size in bytes
    /// Larger bodies are rejected with 413
    /// Default: 10 MiB
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { max_body_bytes: default_max_body_bytes() }
    }
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

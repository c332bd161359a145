use serde::Deserialize;
use std::time::Duration;

/// Per-identity rate limiting configuration
///
/// An identity issuing more than `max_requests` within the trailing
/// `window_secs` is rerouted to the overflow backend until the next
/// ban-period reset.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Length of the trailing window in seconds
    /// Default: 10
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Maximum requests allowed inside the window before rerouting
    /// Default: 10
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// Seconds between global resets of every override and window
    /// Default: 600
    #[serde(default = "default_ban_period_secs")]
    pub ban_period_secs: u64,
    /// Number of buckets the window is divided into
    /// More buckets = smoother trailing count, more memory per identity
    /// Default: 20
    #[serde(default = "default_window_buckets")]
    pub window_buckets: usize,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn ban_period(&self) -> Duration {
        Duration::from_secs(self.ban_period_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            ban_period_secs: default_ban_period_secs(),
            window_buckets: default_window_buckets(),
        }
    }
}

fn default_window_secs() -> u64 {
    10
}

fn default_max_requests() -> u64 {
    10
}

fn default_ban_period_secs() -> u64 {
    600
}

fn default_window_buckets() -> usize {
    20
}

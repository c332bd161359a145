mod backend;
mod headers;
mod loader;
mod rate_limit;
mod root;
mod telemetry;
mod timeout;
mod traffic;

pub use backend::{Backend, BackendHttpVersion, BackendPoolConfig};
pub use headers::InjectedHeaders;
pub use loader::{load_from_path, load_from_str, read_list};
pub use rate_limit::RateLimitConfig;
pub use root::Config;
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
pub use traffic::{BypassConfig, LimitsConfig, TrafficConfig};

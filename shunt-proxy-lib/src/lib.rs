#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod load_balancing;
pub mod proxy;
pub mod routing;
pub mod telemetry;
pub mod traffic;

pub use config::{load_from_path, Backend, BackendHttpVersion, Config};
pub use error::{ProxyError, Result};
pub use identity::RequestParams;
pub use proxy::{forwarding, run, serve};
pub use routing::{RouteSnapshot, Routing};

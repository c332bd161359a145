use crate::config::{BackendHttpVersion, BackendPoolConfig, KeepAliveConfig};
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

/// Request bodies are buffered before forwarding, so upstream calls send `Full`
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Shared HTTP client pool for backend connections
///
/// One pooled client per upstream HTTP version, reused by every request so
/// keep-alive connections to the default pool and the overflow backend are
/// shared across client connections.
#[derive(Clone)]
pub struct ClientPool {
    http11: HttpClient,
    http2: HttpClient,
}

impl ClientPool {
    pub fn new(
        keep_alive: &KeepAliveConfig,
        config: &BackendPoolConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            http11: Self::build(keep_alive, config, connect_timeout, false),
            http2: Self::build(keep_alive, config, connect_timeout, true),
        }
    }

    fn build(
        keep_alive: &KeepAliveConfig,
        config: &BackendPoolConfig,
        connect_timeout: Duration,
        http2_only: bool,
    ) -> HttpClient {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        // TCP keep-alive: sends periodic packets to keep TCP connection alive
        if keep_alive.enabled {
            connector.set_keepalive(Some(Duration::from_secs(keep_alive.timeout_secs)));
        } else {
            connector.set_keepalive(None);
        }

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_idle_timeout(Duration::from_secs(config.idle_timeout));
        if http2_only {
            builder.http2_only(true);
        }
        if config.pool_max_idle_per_host > 0 {
            builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
        }

        builder.build(connector)
    }

    /// Client for the backend's configured HTTP version
    pub fn get_client(&self, version: BackendHttpVersion) -> &HttpClient {
        match version {
            BackendHttpVersion::Http2 => &self.http2,
            BackendHttpVersion::Http11 => &self.http11,
        }
    }
}

use ahash::AHashSet;
use http::header::HeaderName;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Backend, Config, InjectedHeaders};
use crate::error::{ProxyError, Result};
use crate::proxy::client_pool::ClientPool;
use crate::routing::Routing;
use crate::telemetry::Metrics;
use crate::traffic::TrafficHandle;

/// Parsed names of the headers the proxy writes
#[derive(Debug, Clone)]
pub struct HeaderNames {
    pub identity: HeaderName,
    pub appid: HeaderName,
    pub command: HeaderName,
    pub override_target: HeaderName,
    pub bypass: HeaderName,
    pub trusted_source: HeaderName,
}

impl HeaderNames {
    pub fn parse(headers: &InjectedHeaders) -> Result<Self> {
        let parse = |name: &str| {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::Config(format!("Invalid header name '{name}': {e}")))
        };
        Ok(Self {
            identity: parse(&headers.identity)?,
            appid: parse(&headers.appid)?,
            command: parse(&headers.command)?,
            override_target: parse(&headers.override_target)?,
            bypass: parse(&headers.bypass)?,
            trusted_source: parse(&headers.trusted_source)?,
        })
    }
}

/// Everything a request handler needs, shared by all connections
pub struct ProxyContext {
    pub headers: HeaderNames,
    pub bypass: AHashSet<String>,
    pub trusted_sources: AHashSet<IpAddr>,
    pub default_pool: Arc<[Backend]>,
    pub routing: Routing,
    pub traffic: Option<TrafficHandle>,
    pub client_pool: ClientPool,
    pub exchange_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_body_bytes: usize,
    pub metrics: Option<Arc<Metrics>>,
}

impl ProxyContext {
    pub fn new(
        config: &Config,
        routing: Routing,
        traffic: Option<TrafficHandle>,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let trusted_sources: AHashSet<IpAddr> = config
            .bypass
            .source_ips
            .iter()
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map(|ip| ip.to_canonical())
                    .map_err(|e| ProxyError::Config(format!("Invalid bypass source '{ip}': {e}")))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            headers: HeaderNames::parse(&config.headers)?,
            bypass: config.bypass.appids.iter().cloned().collect(),
            trusted_sources,
            default_pool: config.backends.clone().into(),
            routing,
            traffic,
            client_pool: ClientPool::new(
                &config.timeout.keep_alive,
                &config.backend_pool,
                config.timeout.connect(),
            ),
            exchange_timeout: config.timeout.exchange(),
            upstream_timeout: config.timeout.upstream(),
            max_body_bytes: config.limits.max_body_bytes,
            metrics,
        })
    }

    pub fn is_bypass(&self, appid: &str) -> bool {
        self.bypass.contains(appid)
    }

    /// IPv4-mapped peers on a dual-stack listener match their IPv4 entry.
    pub fn is_trusted_source(&self, peer: IpAddr) -> bool {
        self.trusted_sources.contains(&peer.to_canonical())
    }
}

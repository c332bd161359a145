use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::request::Parts;
use http::{Request, Response, Uri, Version};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{Backend, BackendHttpVersion};
use crate::proxy::client_pool::ClientPool;
use crate::proxy::handler::headers::remove_hop_by_hop;
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::proxy::synthetic_response::RespBody;
use crate::telemetry::Metrics;

pub struct ForwardConfig<'a> {
    pub client_pool: &'a ClientPool,
    pub upstream_timeout: Duration,
    pub metrics: Option<&'a Arc<Metrics>>,
}

/// Rewrite the request target to `backend`, keeping path and query.
pub fn upstream_uri(uri: &Uri, backend: &Backend) -> HttpResult<Uri> {
    let pq = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{}{}", backend.address, pq)
        .parse::<Uri>()
        .map_err(|e| HttpError::FailedToGenerateUpstreamRequest(e.to_string()))
}

pub fn determine_http_version(backend: &Backend) -> Version {
    match backend.version() {
        BackendHttpVersion::Http11 => Version::HTTP_11,
        BackendHttpVersion::Http2 => Version::HTTP_2,
    }
}

/// Send the buffered request to `backend` and stream the response back.
///
/// The body is replayed exactly as it was read. Request headers must already
/// be free of hop-by-hop entries. No retry on failure.
pub async fn forward(
    mut parts: Parts,
    body: Bytes,
    backend: &Backend,
    config: ForwardConfig<'_>,
) -> HttpResult<Response<RespBody>> {
    let start = Instant::now();

    parts.uri = upstream_uri(&parts.uri, backend)?;
    parts.version = determine_http_version(backend);
    if parts.version == Version::HTTP_2 {
        // the authority travels in the URI
        parts.headers.remove(header::HOST);
    }
    if !body.is_empty() || parts.headers.contains_key(header::CONTENT_LENGTH) {
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    let out_req = Request::from_parts(parts, Full::new(body));
    let client = config.client_pool.get_client(backend.version());
    let result = tokio::time::timeout(config.upstream_timeout, client.request(out_req)).await;
    let duration = start.elapsed().as_secs_f64();

    match result {
        Ok(Ok(mut resp)) => {
            remove_hop_by_hop(resp.headers_mut());
            if let Some(m) = config.metrics {
                m.record_backend_request(&backend.address, resp.status().as_u16(), duration);
            }
            Ok(resp.map(|b| b.boxed()))
        }
        Ok(Err(e)) => {
            debug!(backend = %backend, error = %e, "backend request failed");
            let error = HttpError::FailedToGetResponseFromBackend(e.to_string());
            if let Some(m) = config.metrics {
                m.record_backend_error(&backend.address, error.error_type());
            }
            Err(error)
        }
        Err(_) => {
            let limit = u64::try_from(config.upstream_timeout.as_millis()).unwrap_or(u64::MAX);
            let error = HttpError::UpstreamTimeout(limit);
            if let Some(m) = config.metrics {
                m.record_backend_error(&backend.address, error.error_type());
            }
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_uri_keeps_path_and_query() -> HttpResult<()> {
        let uri = Uri::from_static("/api/chat?userid=1&appid=a");
        let out = upstream_uri(&uri, &Backend::new("10.0.0.1:9001"))?;
        assert_eq!(out.to_string(), "http://10.0.0.1:9001/api/chat?userid=1&appid=a");
        Ok(())
    }

    #[test]
    fn upstream_uri_defaults_to_root() -> HttpResult<()> {
        let uri = Uri::from_static("http://client.example");
        let out = upstream_uri(&uri, &Backend::new("b:1"))?;
        assert_eq!(out.to_string(), "http://b:1/");
        Ok(())
    }

    #[test]
    fn http_version_follows_backend() {
        let mut backend = Backend::new("b:1");
        assert_eq!(determine_http_version(&backend), Version::HTTP_11);
        backend.http_version = Some(BackendHttpVersion::Http2);
        assert_eq!(determine_http_version(&backend), Version::HTTP_2);
    }
}

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, HOST};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::Backend;
use crate::identity::RequestParams;
use crate::load_balancing;
use crate::proxy::context::ProxyContext;
use crate::proxy::forwarding::{forward, ForwardConfig};
use crate::proxy::handler::headers::{add_forwarded_headers, remove_hop_by_hop, set_or_remove};
use crate::proxy::http_result::{HttpError, HttpResult};
use crate::proxy::synthetic_response::{synthetic_error_response, RespBody};
use crate::routing::{Destination, ExchangeError, RouteSnapshot};
use crate::telemetry::metrics::values;
use crate::traffic::TrafficEvent;

/// How the destination was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Default,
    Override,
    Bypass,
    /// Client address on the trusted source list; not counted
    TrustedSource,
    /// Routing state unavailable; random default pool member
    Fallback,
    /// Rejected before routing
    Rejected,
}

impl RouteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteKind::Default => values::ROUTE_DEFAULT,
            RouteKind::Override => values::ROUTE_OVERRIDE,
            RouteKind::Bypass => values::ROUTE_BYPASS,
            RouteKind::TrustedSource => values::ROUTE_TRUSTED_SOURCE,
            RouteKind::Fallback => values::ROUTE_FALLBACK,
            RouteKind::Rejected => values::ROUTE_REJECTED,
        }
    }
}

/// Fields of the access log line, filled in while the request is handled
#[derive(Debug)]
struct AccessLog {
    method: Method,
    path: String,
    appid: String,
    identity: String,
    destination: String,
    route: RouteKind,
}

/// Handle one proxied request end to end; never fails.
///
/// Errors become synthetic responses. One access log line is written per request.
pub async fn handle_proxy_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: &ProxyContext,
) -> Response<RespBody> {
    let start = Instant::now();
    let mut log = AccessLog {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        appid: String::new(),
        identity: String::new(),
        destination: String::new(),
        route: RouteKind::Rejected,
    };

    let response = match dispatch(req, peer, ctx, &mut log).await {
        Ok(resp) => resp,
        Err(e) => {
            if matches!(e, HttpError::FailedToGetResponseFromBackend(_) | HttpError::UpstreamTimeout(_)) {
                warn!(backend = %log.destination, error = %e, "proxy error");
            }
            if let Some(m) = &ctx.metrics {
                m.record_error(e.error_type());
            }
            synthetic_error_response(StatusCode::from(&e))
        }
    };

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    info!(
        method = %log.method,
        path = %log.path,
        appid = %log.appid,
        identity = %log.identity,
        destination = %log.destination,
        route = log.route.as_str(),
        status,
        duration_ms = elapsed.as_millis() as u64,
        "request"
    );
    if let Some(m) = &ctx.metrics {
        m.record_request(log.method.as_str(), status, log.route.as_str(), elapsed.as_secs_f64());
    }
    response
}

async fn dispatch(
    req: Request<Incoming>,
    peer: SocketAddr,
    ctx: &ProxyContext,
    log: &mut AccessLog,
) -> HttpResult<Response<RespBody>> {
    let (mut parts, body) = req.into_parts();

    if parts.method != Method::GET && parts.method != Method::POST {
        let host = parts.headers.get(HOST).and_then(|h| h.to_str().ok()).unwrap_or_default();
        warn!(host, method = %parts.method, "unsupported method");
        return Err(HttpError::MethodNotAllowed(parts.method.to_string()));
    }

    let body = read_body(&parts.headers, body, ctx.max_body_bytes).await?;
    let params =
        RequestParams::parse(&parts.method, &parts.headers, &body, parts.uri.query()).await;
    let identity = params.identity();
    let appid = params.appid().to_string();
    log.appid.clone_from(&appid);
    log.identity.clone_from(&identity);

    // before injection, so `Connection` cannot name the proxy's own headers
    remove_hop_by_hop(&mut parts.headers);
    // only the proxy decides on an override
    parts.headers.remove(&ctx.headers.override_target);

    let (backend, route) = if ctx.is_bypass(&appid) {
        choose_uncounted(ctx, RouteKind::Bypass).await?
    } else if ctx.is_trusted_source(peer.ip()) {
        choose_uncounted(ctx, RouteKind::TrustedSource).await?
    } else {
        choose(ctx, &identity).await?
    };
    log.destination.clone_from(&backend.address);
    log.route = route;

    set_or_remove(&mut parts.headers, &ctx.headers.identity, &identity);
    set_or_remove(&mut parts.headers, &ctx.headers.appid, &appid);
    set_or_remove(&mut parts.headers, &ctx.headers.command, params.command());
    parts.headers.remove(&ctx.headers.bypass);
    parts.headers.remove(&ctx.headers.trusted_source);
    match route {
        RouteKind::Override => {
            set_or_remove(&mut parts.headers, &ctx.headers.override_target, &backend.address);
        }
        RouteKind::Bypass => {
            parts
                .headers
                .insert(ctx.headers.bypass.clone(), HeaderValue::from_static("1"));
        }
        RouteKind::TrustedSource => {
            parts
                .headers
                .insert(ctx.headers.trusted_source.clone(), HeaderValue::from_static("1"));
        }
        _ => {}
    }
    add_forwarded_headers(&mut parts.headers, peer.ip());

    if let Some(traffic) = &ctx.traffic {
        traffic.send(TrafficEvent { appid, source: peer.ip(), identity });
    }

    forward(
        parts,
        body,
        &backend,
        ForwardConfig {
            client_pool: &ctx.client_pool,
            upstream_timeout: ctx.upstream_timeout,
            metrics: ctx.metrics.as_ref(),
        },
    )
    .await
}

/// Buffer the whole body, refusing anything over `limit` bytes.
async fn read_body(
    headers: &http::HeaderMap,
    body: Incoming,
    limit: usize,
) -> HttpResult<Bytes> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(HttpError::PayloadTooLarge { limit });
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(HttpError::PayloadTooLarge { limit })
        }
        Err(e) => Err(HttpError::BodyRead(e.to_string())),
    }
}

/// Count the request and resolve its destination from the owner's reply.
async fn choose(ctx: &ProxyContext, identity: &str) -> HttpResult<(Backend, RouteKind)> {
    let draw = load_balancing::draw();
    let observed = ctx
        .routing
        .observer
        .observe_timeout(identity.to_string(), ctx.exchange_timeout)
        .await;
    match observed {
        Ok(snapshot) => match snapshot.resolve(identity, draw) {
            Some(Destination::Override(b)) => Ok((b.clone(), RouteKind::Override)),
            Some(Destination::Default(b)) => Ok((b.clone(), RouteKind::Default)),
            None => Err(HttpError::NoUpstream),
        },
        Err(e) => fallback(ctx, e, draw),
    }
}

/// Default pool only, without counting; reads through the broker.
async fn choose_uncounted(ctx: &ProxyContext, kind: RouteKind) -> HttpResult<(Backend, RouteKind)> {
    let draw = load_balancing::draw();
    match ctx.routing.reader.read_timeout(ctx.exchange_timeout).await {
        Ok(snapshot) => pick_default(&snapshot, draw).map(|b| (b, kind)),
        Err(e) => fallback(ctx, e, draw).map(|(b, _)| (b, kind)),
    }
}

fn pick_default(snapshot: &Arc<RouteSnapshot>, draw: u64) -> HttpResult<Backend> {
    snapshot.pick_default(draw).cloned().ok_or(HttpError::NoUpstream)
}

fn fallback(ctx: &ProxyContext, e: ExchangeError, draw: u64) -> HttpResult<(Backend, RouteKind)> {
    warn!(error = %e, "routing state unavailable, using default pool");
    if let Some(m) = &ctx.metrics {
        let reason = match e {
            ExchangeError::Timeout => values::REASON_TIMEOUT,
            ExchangeError::Closed => values::REASON_CLOSED,
        };
        m.record_exchange_fallback(reason);
    }
    load_balancing::pick(&ctx.default_pool, draw)
        .cloned()
        .map(|b| (b, RouteKind::Fallback))
        .ok_or(HttpError::NoUpstream)
}

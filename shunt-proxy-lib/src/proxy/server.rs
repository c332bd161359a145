use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::proxy::connection::ConnectionManager;
use crate::proxy::context::ProxyContext;
use crate::proxy::handler::handle_proxy_request;
use crate::proxy::synthetic_response::{text_response, RespBody};
use crate::routing::{self, SystemClock};
use crate::telemetry::{health_check_response, is_health_path, Metrics};
use crate::traffic;

/// Resolves on the first SIGTERM or SIGINT
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| ProxyError::Io(std::io::Error::other(format!("Failed to setup SIGTERM handler: {e}"))))?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| ProxyError::Io(std::io::Error::other(format!("Failed to setup SIGINT handler: {e}"))))?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    })
}

/// Bind `config.listen` and serve until SIGTERM/SIGINT.
pub async fn run(config: Arc<Config>, metrics: Option<Arc<Metrics>>) -> Result<()> {
    let shutdown = shutdown_signal()?;
    let addr = config.listen;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })?;
    serve(listener, config, metrics, shutdown).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// Starts the routing tasks and, if configured, the traffic counter. After
/// `shutdown` no new connections are accepted and open ones get up to
/// `timeout.shutdown_secs` to finish.
pub async fn serve<F>(
    listener: TcpListener,
    config: Arc<Config>,
    metrics: Option<Arc<Metrics>>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let routing = routing::spawn(&config, Arc::new(SystemClock), metrics.clone());
    let traffic = traffic::start(&config.traffic, metrics.clone()).await;
    let ctx = Arc::new(ProxyContext::new(&config, routing, traffic, metrics.clone())?);
    let connections = ConnectionManager::new();
    let builder = ConnBuilder::new(TokioExecutor::new());

    let addr = listener.local_addr().ok();
    info!(
        ?addr,
        backends = config.backends.len(),
        overflow = %config.overflow,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        "starting shunt proxy"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                connections.begin_shutdown();
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept error");
                        continue;
                    }
                };

                let guard = match connections.try_accept(metrics.as_ref()) {
                    Ok(guard) => guard,
                    Err(e) => {
                        debug!(?peer, error = %e, "connection refused");
                        continue;
                    }
                };

                let builder = builder.clone();
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    let _guard = guard;
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let ctx = Arc::clone(&ctx);
                        async move { Ok::<_, hyper::Error>(route(req, peer, &ctx).await) }
                    });
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        debug!(?peer, error = %e, "serve_connection error");
                    }
                });
            }
        }
    }

    drop(listener);
    info!(
        active_connections = connections.active(),
        "Waiting for active connections to finish (timeout: {}s)", config.timeout.shutdown_secs
    );
    connections
        .drain(Duration::from_secs(config.timeout.shutdown_secs))
        .await;
    info!("Proxy server stopped");
    Ok(())
}

async fn route(req: Request<Incoming>, peer: SocketAddr, ctx: &ProxyContext) -> Response<RespBody> {
    if is_health_path(req.uri().path()) {
        return health_check_response().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build health response");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        });
    }
    handle_proxy_request(req, peer, ctx).await
}

//! HTTP server setup and connection handling.
//!
//! # Responsibilities
//! - Create the Axum router around the proxy handler
//! - Wire up middleware (request ID, tracing, write timeout)
//! - The proxy handler echoes the request ID; rejections go out without it
//! - Accept tcp or unix connections and serve HTTP/1.1 and HTTP/2
//! - Drain in-flight connections on shutdown
//!
//! # Design Decisions
//! - Connections are served directly with hyper so unix peers get a
//!   `PeerAddr` just like tcp peers
//! - Timeouts come from the live snapshot; a reload applies to new
//!   connections and requests

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::task::JoinSet;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::proxy::proxy_handler;
use super::response::json_response;
use crate::config::ConfigStore;
use crate::lifecycle::{Shutdown, ShutdownSignal, DRAIN_DEADLINE};
use crate::net::{Connection, ConnectionTracker, Listener, PeerAddr};
use crate::transport::TransportCache;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub transports: Arc<TransportCache>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        let state = AppState {
            store,
            transports: Arc::new(TransportCache::new()),
        };
        let router = Self::build_router(state.clone());
        Self {
            router,
            state,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .layer(middleware::from_fn_with_state(state.clone(), enforce_write_timeout))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http()),
            )
    }

    /// Build the upstream transport for the current snapshot.
    ///
    /// Surfaces a bad upstream at startup instead of on the first request.
    pub fn prepare_transport(&self) -> Result<(), crate::transport::TransportError> {
        let config = self.state.store.current();
        self.state.transports.for_snapshot(&config).map(|_| ())
    }

    /// Serve until `shutdown` fires, then drain for up to [`DRAIN_DEADLINE`].
    pub async fn run(self, listener: Listener, shutdown: Shutdown) {
        tracing::info!(address = %listener.describe(), "HTTP server starting");

        let mut stop = shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((conn, peer)) => {
                        self.spawn_connection(&mut connections, conn, peer, shutdown.subscribe());
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Stopped accepting connections, draining"
        );

        match tokio::time::timeout(DRAIN_DEADLINE, self.tracker.drained()).await {
            Ok(()) => tracing::info!("HTTP server stopped"),
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.active_count(),
                    deadline_secs = DRAIN_DEADLINE.as_secs(),
                    "Server forced to shutdown"
                );
                connections.abort_all();
            }
        }
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        conn: Connection,
        peer: PeerAddr,
        mut stop: ShutdownSignal,
    ) {
        let guard = self.tracker.track();
        let router = self.router.clone();
        let timeouts = self.state.store.current().listen.timeouts();

        connections.spawn(async move {
            let connection_id = guard.id();
            tracing::debug!(connection_id = %connection_id, peer = %peer, "Connection accepted");

            let connect_info = ConnectInfo(peer.clone());
            let service = service_fn(move |request: Request<Incoming>| {
                let (parts, body) = request.into_parts();
                let mut request = Request::from_parts(parts, Body::new(body));
                request.extensions_mut().insert(connect_info.clone());
                let router = router.clone();
                async move { router.oneshot(request).await.map_err(|e: Infallible| e) }
            });

            let mut builder = AutoBuilder::new(TokioExecutor::new());
            if let Some(idle) = timeouts.idle {
                builder.http1().timer(TokioTimer::new()).header_read_timeout(idle);
            }

            let conn = builder.serve_connection_with_upgrades(TokioIo::new(conn), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = stop.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };
            if let Err(e) = result {
                tracing::debug!(connection_id = %connection_id, peer = %peer, error = %e, "Connection closed with error");
            }

            drop(guard);
        });
    }
}

/// Bound the time spent producing a response head.
async fn enforce_write_timeout(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limit) = state.store.current().listen.timeouts().write else {
        return next.run(request).await;
    };

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "Response not ready before write timeout");
            json_response(StatusCode::REQUEST_TIMEOUT, "Request timed out.")
        }
    }
}

//! The pooled upstream client.
//!
//! # Responsibilities
//! - Build a hyper client from the upstream section of a snapshot
//! - Classify failures as timeouts or unreachable upstreams
//! - Reuse one client per upstream configuration

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::http::uri::Scheme;
use axum::http::{Request, Response, Uri};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;
use url::Url;

use super::connector::{DialError, UpstreamConnector};
use crate::config::validation::{parse_upstream_url, ValidationError};
use crate::config::{PolicyConfig, UpstreamConfig};

type BoxError = Box<dyn StdError + Send + Sync>;

/// hyper refuses read buffers smaller than this.
const MIN_HTTP1_BUFFER: usize = 8192;

pub type UpstreamClient = Client<HandshakeDeadline<HttpsConnector<UpstreamConnector>>, Body>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid upstream: {0}")]
    InvalidUpstream(#[from] ValidationError),
    #[error(transparent)]
    Dial(#[from] DialError),
    #[error("tls setup failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("upstream request failed: {}", error_chain(.0))]
    Request(#[source] hyper_util::client::legacy::Error),
}

impl TransportError {
    /// Whether the failure was a dial or handshake timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::InvalidUpstream(_) | TransportError::Tls(_) => false,
            TransportError::Dial(e) => e.is_timeout(),
            TransportError::Request(e) => chain_has_timeout(e),
        }
    }
}

fn chain_has_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<DialError>().is_some_and(DialError::is_timeout) {
            return true;
        }
        if e.downcast_ref::<io::Error>().is_some_and(|io| io.kind() == io::ErrorKind::TimedOut) {
            return true;
        }
        current = e.source();
    }
    false
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(e) = current {
        message.push_str(": ");
        message.push_str(&e.to_string());
        current = e.source();
    }
    message
}

/// A client bound to one upstream target.
#[derive(Clone)]
pub struct Transport {
    client: UpstreamClient,
    target: Arc<Url>,
}

impl Transport {
    pub fn build(config: &UpstreamConfig) -> Result<Self, TransportError> {
        let target = parse_upstream_url(&config.url)?;
        let dialer = UpstreamConnector::new(config, &target)?;

        let tls = HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http();
        let https = if config.force_attempt_http2 {
            tls.enable_all_versions().wrap_connector(dialer)
        } else {
            tls.enable_http1().wrap_connector(dialer)
        };
        let connector = HandshakeDeadline {
            inner: https,
            deadline: config.tls_handshake_timeout(),
        };

        if config.expect_continue_timeout > 0 {
            tracing::debug!(
                expect_continue_timeout = config.expect_continue_timeout,
                "expectContinueTimeout has no effect; request bodies are sent without waiting"
            );
        }

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(config.idle_conn_timeout());
        if let Some(cap) = config.idle_per_host_cap() {
            builder.pool_max_idle_per_host(cap);
        }
        if config.read_buffer_size > 0 {
            builder.http1_max_buf_size(config.read_buffer_size.max(MIN_HTTP1_BUFFER));
        }

        Ok(Self {
            client: builder.build(connector),
            target: Arc::new(target),
        })
    }

    /// Base URL requests are rewritten onto.
    pub fn target(&self) -> &Url {
        &self.target
    }

    pub async fn dispatch(&self, request: Request<Body>) -> Result<Response<Incoming>, TransportError> {
        self.client.request(request).await.map_err(TransportError::Request)
    }
}

/// Bounds dial plus TLS handshake for https upstreams.
#[derive(Clone)]
pub struct HandshakeDeadline<C> {
    inner: C,
    deadline: Option<Duration>,
}

impl<C> tower::Service<Uri> for HandshakeDeadline<C>
where
    C: tower::Service<Uri> + Clone + Send + 'static,
    C::Response: Send + 'static,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = C::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<C::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let deadline = self
            .deadline
            .filter(|_| uri.scheme() == Some(&Scheme::HTTPS));
        let connecting = self.inner.call(uri);

        Box::pin(async move {
            match deadline {
                Some(limit) => match tokio::time::timeout(limit, connecting).await {
                    Ok(result) => result.map_err(Into::into),
                    Err(_) => Err(DialError::HandshakeTimeout.into()),
                },
                None => connecting.await.map_err(Into::into),
            }
        })
    }
}

/// Caches the transport for the current upstream configuration.
///
/// Reloads that leave the upstream section untouched keep the pool.
#[derive(Default)]
pub struct TransportCache {
    current: ArcSwapOption<CachedTransport>,
}

struct CachedTransport {
    upstream: UpstreamConfig,
    transport: Transport,
}

impl TransportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport for `config`, building a new one if the upstream changed.
    pub fn for_snapshot(&self, config: &PolicyConfig) -> Result<Transport, TransportError> {
        if let Some(cached) = &*self.current.load() {
            if cached.upstream == config.upstream {
                return Ok(cached.transport.clone());
            }
        }

        let transport = Transport::build(&config.upstream)?;
        tracing::info!(
            upstream = %transport.target(),
            protocol = %config.upstream.protocol,
            "Upstream transport built"
        );
        self.current.store(Some(Arc::new(CachedTransport {
            upstream: config.upstream.clone(),
            transport: transport.clone(),
        })));
        Ok(transport)
    }
}

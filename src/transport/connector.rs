//! Dialing the upstream.
//!
//! # Responsibilities
//! - Resolve the configured dial target (tcp host:port or unix socket)
//! - Apply dial timeout, keep-alive and socket buffer sizes
//! - Cap concurrent connections when `maxConnsPerHost` is set
//!
//! # Design Decisions
//! - The URI hyper passes in is ignored; the connector always dials the
//!   configured target so unix upstreams work with ordinary http URLs
//! - The connection-limit permit lives inside the stream and is released
//!   when the pooled connection is finally dropped

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection as HyperConnection};
use hyper_util::rt::TokioIo;
use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::{Host, Url};

use crate::config::{Protocol, UpstreamConfig};
use crate::net::Connection;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("upstream url `{0}` has no host")]
    MissingHost(String),
    #[error("no default port for scheme `{0}`")]
    UnknownScheme(String),
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("{0} resolved to no addresses")]
    NoAddresses(String),
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("dial to {0} timed out")]
    Timeout(String),
    #[error("TLS handshake with upstream timed out")]
    HandshakeTimeout,
    #[error("connection limiter closed")]
    LimiterClosed,
}

impl DialError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DialError::Timeout(_) | DialError::HandshakeTimeout)
    }
}

/// Where upstream connections go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl DialTarget {
    pub fn resolve(upstream: &UpstreamConfig, url: &Url) -> Result<Self, DialError> {
        match upstream.protocol {
            Protocol::Unix => Ok(DialTarget::Unix(PathBuf::from(&upstream.socket_path))),
            Protocol::Tcp => {
                let host = match url.host() {
                    Some(Host::Domain(domain)) => domain.to_string(),
                    Some(Host::Ipv4(addr)) => addr.to_string(),
                    Some(Host::Ipv6(addr)) => addr.to_string(),
                    None => return Err(DialError::MissingHost(url.to_string())),
                };
                let port = match url.port() {
                    Some(port) => port,
                    None => default_port(url.scheme())?,
                };
                Ok(DialTarget::Tcp { host, port })
            }
        }
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialTarget::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            DialTarget::Tcp { host, port } => write!(f, "{}:{}", host, port),
            DialTarget::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

fn default_port(scheme: &str) -> Result<u16, DialError> {
    match scheme {
        "http" => Ok(80),
        "https" => Ok(443),
        other => Err(DialError::UnknownScheme(other.to_string())),
    }
}

/// Connector handed to the hyper client.
#[derive(Clone)]
pub struct UpstreamConnector {
    inner: Arc<DialSettings>,
}

struct DialSettings {
    target: DialTarget,
    dial_timeout: Option<Duration>,
    keep_alive: Option<Duration>,
    send_buffer: Option<u32>,
    recv_buffer: Option<u32>,
    limiter: Option<Arc<Semaphore>>,
}

impl UpstreamConnector {
    pub fn new(upstream: &UpstreamConfig, url: &Url) -> Result<Self, DialError> {
        let target = DialTarget::resolve(upstream, url)?;
        let limiter = (upstream.max_conns_per_host > 0)
            .then(|| Arc::new(Semaphore::new(upstream.max_conns_per_host)));

        Ok(Self {
            inner: Arc::new(DialSettings {
                target,
                dial_timeout: upstream.dial_timeout(),
                keep_alive: upstream.keep_alive(),
                send_buffer: buffer_size(upstream.write_buffer_size),
                recv_buffer: buffer_size(upstream.read_buffer_size),
                limiter,
            }),
        })
    }

    async fn connect(settings: Arc<DialSettings>) -> Result<UpstreamStream, DialError> {
        let permit = match &settings.limiter {
            Some(limiter) => Some(
                limiter
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| DialError::LimiterClosed)?,
            ),
            None => None,
        };

        let io = match settings.dial_timeout {
            Some(limit) => tokio::time::timeout(limit, settings.dial())
                .await
                .map_err(|_| DialError::Timeout(settings.target.to_string()))??,
            None => settings.dial().await?,
        };

        tracing::trace!(target_addr = %settings.target, "Dialed upstream");
        Ok(UpstreamStream {
            io: TokioIo::new(io),
            _permit: permit,
        })
    }
}

impl DialSettings {
    async fn dial(&self) -> Result<Connection, DialError> {
        match &self.target {
            DialTarget::Unix(path) => UnixStream::connect(path)
                .await
                .map(Connection::Unix)
                .map_err(|source| DialError::Connect {
                    target: self.target.to_string(),
                    source,
                }),
            DialTarget::Tcp { host, port } => {
                let addrs = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|source| DialError::Resolve {
                        target: self.target.to_string(),
                        source,
                    })?;

                let mut last_error = None;
                for addr in addrs {
                    match self.connect_tcp(addr).await {
                        Ok(stream) => return Ok(Connection::Tcp(stream)),
                        Err(e) => {
                            tracing::debug!(address = %addr, error = %e, "Upstream address failed");
                            last_error = Some(e);
                        }
                    }
                }

                Err(match last_error {
                    Some(source) => DialError::Connect {
                        target: self.target.to_string(),
                        source,
                    },
                    None => DialError::NoAddresses(self.target.to_string()),
                })
            }
        }
    }

    async fn connect_tcp(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(size) = self.send_buffer {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = self.recv_buffer {
            socket.set_recv_buffer_size(size)?;
        }

        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        if let Some(period) = self.keep_alive {
            let keepalive = TcpKeepalive::new().with_time(period).with_interval(period);
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }
        Ok(stream)
    }
}

fn buffer_size(size: usize) -> Option<u32> {
    (size > 0).then(|| u32::try_from(size).unwrap_or(u32::MAX))
}

impl tower::Service<Uri> for UpstreamConnector {
    type Response = UpstreamStream;
    type Error = DialError;
    type Future = Pin<Box<dyn Future<Output = Result<UpstreamStream, DialError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        Box::pin(Self::connect(self.inner.clone()))
    }
}

/// A dialed upstream connection.
pub struct UpstreamStream {
    io: TokioIo<Connection>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl HyperConnection for UpstreamStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for UpstreamStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl Write for UpstreamStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write_vectored(cx, bufs)
    }
}

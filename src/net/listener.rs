//! Listener implementation for tcp and unix sockets.
//!
//! # Responsibilities
//! - Bind to the configured address or socket path
//! - Adopt a socket handed over by the service manager (`LISTEN_PID`/`LISTEN_FDS`)
//! - Accept connections and report the peer address

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

use crate::config::{ListenConfig, Protocol};

/// First descriptor passed by socket activation.
const LISTEN_FDS_START: RawFd = 3;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// Failed to adopt an inherited socket.
    #[error("Failed to adopt inherited listener: {0}")]
    Inherit(#[source] io::Error),
    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// The direct peer of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(SocketAddr),
    Unix(Option<PathBuf>),
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(addr) => write!(f, "{}", addr),
            PeerAddr::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            PeerAddr::Unix(None) => f.write_str("unix:@"),
        }
    }
}

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenConfig) -> Result<Self, ListenerError> {
        let listener = match config.protocol {
            Protocol::Tcp => {
                let address = config.bind_address();
                let listener = TcpListener::bind(&address)
                    .await
                    .map_err(|source| ListenerError::Bind { address, source })?;
                Listener::Tcp(listener)
            }
            Protocol::Unix => {
                let path = Path::new(&config.path);
                remove_stale_socket(path);
                let listener = UnixListener::bind(path).map_err(|source| ListenerError::Bind {
                    address: config.path.clone(),
                    source,
                })?;
                Listener::Unix(listener)
            }
        };

        tracing::info!(address = %listener.describe(), "Listener bound");
        Ok(listener)
    }

    /// Adopt descriptor 3 when `LISTEN_PID` names this process.
    pub fn inherited(config: &ListenConfig) -> Result<Option<Self>, ListenerError> {
        if !socket_activated() {
            return Ok(None);
        }

        let listener = match config.protocol {
            Protocol::Tcp => {
                let std = std::net::TcpListener::from(take_activated_fd());
                std.set_nonblocking(true).map_err(ListenerError::Inherit)?;
                Listener::Tcp(TcpListener::from_std(std).map_err(ListenerError::Inherit)?)
            }
            Protocol::Unix => {
                let std = std::os::unix::net::UnixListener::from(take_activated_fd());
                std.set_nonblocking(true).map_err(ListenerError::Inherit)?;
                Listener::Unix(UnixListener::from_std(std).map_err(ListenerError::Inherit)?)
            }
        };

        Ok(Some(listener))
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> Result<(Connection, PeerAddr), ListenerError> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await.map_err(ListenerError::Accept)?;
                let _ = stream.set_nodelay(true);
                Ok((Connection::Tcp(stream), PeerAddr::Tcp(addr)))
            }
            Listener::Unix(listener) => {
                let (stream, addr) = listener.accept().await.map_err(ListenerError::Accept)?;
                let peer = addr.as_pathname().map(Path::to_path_buf);
                Ok((Connection::Unix(stream), PeerAddr::Unix(peer)))
            }
        }
    }

    /// The bound tcp address, if this is a tcp listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(_) => None,
        }
    }

    /// Human-readable bound address, e.g. `tcp://127.0.0.1:8080`.
    pub fn describe(&self) -> String {
        match self {
            Listener::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => format!("tcp://{}", addr),
                Err(_) => "tcp://?".to_string(),
            },
            Listener::Unix(listener) => match listener.local_addr() {
                Ok(addr) => match addr.as_pathname() {
                    Some(path) => format!("unix://{}", path.display()),
                    None => "unix://@".to_string(),
                },
                Err(_) => "unix://?".to_string(),
            },
        }
    }
}

/// Take ownership of the first socket-activated descriptor.
/// Only called after `socket_activated` confirmed it belongs to us.
fn take_activated_fd() -> OwnedFd {
    // SAFETY: the service manager passes descriptor 3 to this process when
    // LISTEN_PID matches our pid, and nothing else in the process opens or
    // closes it. `inherited` takes it at most once per startup.
    unsafe { OwnedFd::from_raw_fd(LISTEN_FDS_START) }
}

fn socket_activated() -> bool {
    let pid_matches = std::env::var("LISTEN_PID")
        .ok()
        .and_then(|pid| pid.trim().parse::<u32>().ok())
        == Some(std::process::id());
    let has_fds = std::env::var("LISTEN_FDS")
        .ok()
        .and_then(|fds| fds.trim().parse::<u32>().ok())
        .is_some_and(|fds| fds >= 1);
    pid_matches && has_fds
}

/// A socket left behind by a previous run would make bind fail.
fn remove_stale_socket(path: &Path) {
    if let Ok(meta) = std::fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale socket");
            }
        }
    }
}

/// A tcp or unix byte stream, accepted from a client or dialed upstream.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AsyncRead for Connection {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            Connection::Unix(s) => std::pin::Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            Connection::Unix(s) => std::pin::Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => std::pin::Pin::new(s).poll_flush(cx),
            Connection::Unix(s) => std::pin::Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            Connection::Unix(s) => std::pin::Pin::new(s).poll_shutdown(cx),
        }
    }

    fn poll_write_vectored(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(s) => std::pin::Pin::new(s).poll_write_vectored(cx, bufs),
            Connection::Unix(s) => std::pin::Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Connection::Tcp(s) => s.is_write_vectored(),
            Connection::Unix(s) => s.is_write_vectored(),
        }
    }
}

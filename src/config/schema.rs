//! Configuration schema definitions.
//!
//! This module defines the complete configuration snapshot for the gateway.
//! All types derive Serde traits for deserialization from config files; keys
//! are camelCase and the section/field names of the older `server`/`proxy`/
//! `limit` layout are accepted as aliases.

use cidr::{IpCidr, IpInet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

/// One immutable configuration snapshot.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    /// How the gateway accepts client connections.
    #[serde(alias = "server")]
    pub listen: ListenConfig,

    /// Where passed requests are forwarded.
    #[serde(alias = "proxy")]
    pub upstream: UpstreamConfig,

    /// Inspection limits.
    #[serde(alias = "limit")]
    pub limits: LimitConfig,

    /// Peers whose `X-Forwarded-*` claims are trusted, in CIDR or bare IP form.
    #[serde(alias = "inboundProxyNetworks")]
    pub trusted_proxy_networks: Vec<TrustedNetwork>,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Socket family for the listener or the upstream dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    /// Local socket; `unixgram` and `unixpacket` are accepted as aliases.
    Unix,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "unix" | "unixgram" | "unixpacket" => Ok(Protocol::Unix),
            other => Err(format!("unsupported protocol `{}` (expected tcp or unix)", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Unix => f.write_str("unix"),
        }
    }
}

impl Serialize for Protocol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenConfig {
    pub protocol: Protocol,

    /// Bind address for tcp listeners.
    pub address: String,

    /// Bind port for tcp listeners.
    pub port: u16,

    /// Socket path for unix listeners.
    pub path: String,

    /// Seconds allowed to read an inspected request body (0 = unlimited).
    pub read_timeout: u64,

    /// Seconds allowed to produce a response (0 = unlimited).
    pub write_timeout: u64,

    /// Seconds a keep-alive connection may wait for its next request.
    /// Falls back to `read_timeout` when 0.
    pub idle_timeout: u64,

    /// Log every proxied request at info level.
    pub debug: bool,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            address: "127.0.0.1".to_string(),
            port: 8080,
            path: String::new(),
            read_timeout: 0,
            write_timeout: 0,
            idle_timeout: 0,
            debug: false,
        }
    }
}

impl ListenConfig {
    /// `address:port` for tcp listeners.
    pub fn bind_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    pub fn timeouts(&self) -> ServerTimeouts {
        ServerTimeouts {
            read: secs(self.read_timeout),
            write: secs(self.write_timeout),
            idle: secs(self.idle_timeout).or_else(|| secs(self.read_timeout)),
        }
    }
}

/// Server-side timeouts mirrored from the current snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerTimeouts {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub idle: Option<Duration>,
}

/// Upstream target and transport tunables.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamConfig {
    pub protocol: Protocol,

    /// Upstream base URL. Its scheme and authority are used for the request
    /// line even when dialing a unix socket.
    pub url: String,

    /// Socket path dialed when `protocol` is unix.
    #[serde(alias = "unixPath")]
    pub socket_path: String,

    /// Offer HTTP/2 through ALPN on https upstreams.
    pub force_attempt_http2: bool,

    /// Dial timeout in seconds.
    #[serde(alias = "timeout")]
    pub dial_timeout: u64,

    /// TCP keep-alive period in seconds.
    pub keep_alive: u64,

    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,

    /// Maximum simultaneous upstream connections (0 = unlimited).
    pub max_conns_per_host: usize,

    /// Seconds an idle pooled connection is kept.
    pub idle_conn_timeout: u64,
    pub tls_handshake_timeout: u64,
    pub expect_continue_timeout: u64,

    /// Socket send buffer in bytes (0 = system default).
    pub write_buffer_size: usize,

    /// Socket receive buffer in bytes (0 = system default).
    pub read_buffer_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            url: "http://127.0.0.1:3000".to_string(),
            socket_path: String::new(),
            force_attempt_http2: false,
            dial_timeout: 30,
            keep_alive: 30,
            max_idle_conns: 100,
            max_idle_conns_per_host: 0,
            max_conns_per_host: 0,
            idle_conn_timeout: 90,
            tls_handshake_timeout: 10,
            expect_continue_timeout: 1,
            write_buffer_size: 0,
            read_buffer_size: 0,
        }
    }
}

impl UpstreamConfig {
    pub fn dial_timeout(&self) -> Option<Duration> {
        secs(self.dial_timeout)
    }

    pub fn keep_alive(&self) -> Option<Duration> {
        secs(self.keep_alive)
    }

    pub fn idle_conn_timeout(&self) -> Option<Duration> {
        secs(self.idle_conn_timeout)
    }

    pub fn tls_handshake_timeout(&self) -> Option<Duration> {
        secs(self.tls_handshake_timeout)
    }

    /// Idle connections kept per host: the smaller of the non-zero caps.
    pub fn idle_per_host_cap(&self) -> Option<usize> {
        [self.max_idle_conns, self.max_idle_conns_per_host]
            .into_iter()
            .filter(|cap| *cap > 0)
            .min()
    }
}

/// Inspection limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitConfig {
    /// Largest declared body that is buffered for inspection.
    pub max_body_size: u64,

    /// Maximum entries in the top-level `cc` array.
    #[serde(alias = "cc")]
    pub max_cc: usize,

    /// Maximum `Mention` tags in `object.tag`.
    #[serde(alias = "mentions")]
    pub max_mentions: usize,

    /// Case-sensitive denied substrings.
    pub keywords: Vec<String>,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024, // 1MB
            max_cc: 50,
            max_mentions: 20,
            keywords: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Prometheus exporter bind address; no exporter when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_address: None,
        }
    }
}

/// A trusted peer: either a CIDR prefix or a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustedNetwork {
    Cidr(IpCidr),
    Addr(IpAddr),
}

impl TrustedNetwork {
    /// Exact match for addresses, prefix containment for CIDR entries.
    /// Families never match each other; callers canonicalize mapped addresses.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match self {
            TrustedNetwork::Cidr(network) => network.contains(&ip),
            TrustedNetwork::Addr(addr) => *addr == ip,
        }
    }
}

impl FromStr for TrustedNetwork {
    type Err = String;

    /// Host bits after the prefix are ignored, so `10.1.2.3/8` means `10.0.0.0/8`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            s.parse::<IpInet>()
                .map(|inet| TrustedNetwork::Cidr(inet.network()))
                .map_err(|e| format!("invalid trusted network `{}`: {}", s, e))
        } else {
            s.parse::<IpAddr>()
                .map(TrustedNetwork::Addr)
                .map_err(|_| format!("invalid trusted network `{}`", s))
        }
    }
}

impl fmt::Display for TrustedNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustedNetwork::Addr(addr) => write!(f, "{}", addr),
            TrustedNetwork::Cidr(network) => write!(f, "{}", network),
        }
    }
}

impl Serialize for TrustedNetwork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TrustedNetwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

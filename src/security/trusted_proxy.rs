//! Client identity behind trusted reverse proxies.
//!
//! A peer is trusted when the gateway listens on a unix socket, or when the
//! peer address falls inside one of `trustedProxyNetworks`. Only then are
//! X-Forwarded-For, X-Real-IP and X-Forwarded-Proto believed.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

use super::headers::{X_FORWARDED_FOR, X_FORWARDED_PROTO, X_REAL_IP};
use crate::config::{PolicyConfig, Protocol};
use crate::net::PeerAddr;

/// Who the gateway believes it is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// `ip:port` of a tcp peer, or the recovered client address.
    /// `None` for unix peers with nothing recovered.
    pub remote_addr: Option<String>,
    pub scheme: String,
}

impl ClientContext {
    pub fn from_peer(peer: &PeerAddr) -> Self {
        let remote_addr = match peer {
            PeerAddr::Tcp(addr) => Some(addr.to_string()),
            PeerAddr::Unix(_) => None,
        };
        Self {
            remote_addr,
            scheme: "http".to_string(),
        }
    }

    /// The value we contribute to X-Forwarded-For: the address without a port.
    pub fn forwarded_for(&self) -> Option<String> {
        let remote = self.remote_addr.as_deref()?;
        if remote.is_empty() {
            return None;
        }
        Some(match remote.parse::<SocketAddr>() {
            Ok(addr) => addr.ip().to_string(),
            Err(_) => remote.to_string(),
        })
    }
}

/// Whether forwarding headers from `peer` may be believed.
pub fn is_trusted(peer: &PeerAddr, config: &PolicyConfig) -> bool {
    if config.listen.protocol == Protocol::Unix {
        return true;
    }
    match peer {
        PeerAddr::Unix(_) => true,
        PeerAddr::Tcp(addr) => {
            let ip: IpAddr = addr.ip().to_canonical();
            config
                .trusted_proxy_networks
                .iter()
                .any(|network| network.contains(ip))
        }
    }
}

/// Overwrite `ctx` with what the trusted proxy reports.
pub fn recover_client_context(headers: &HeaderMap, ctx: &mut ClientContext) {
    let forwarded_for = header_str(headers, &X_FORWARDED_FOR);
    let recovered = if !forwarded_for.is_empty() {
        Some(forwarded_for.split(',').next().unwrap_or_default().trim())
    } else {
        let real_ip = header_str(headers, &X_REAL_IP);
        (!real_ip.is_empty()).then_some(real_ip)
    };

    if let Some(client) = recovered {
        ctx.remote_addr = Some(client.to_string());
    }

    let proto = header_str(headers, &X_FORWARDED_PROTO);
    if !proto.is_empty() {
        ctx.scheme = proto.to_string();
    }
}

/// Build the context for a request from `peer`.
pub fn resolve_client(peer: &PeerAddr, headers: &HeaderMap, config: &PolicyConfig) -> ClientContext {
    let mut ctx = ClientContext::from_peer(peer);
    if is_trusted(peer, config) {
        recover_client_context(headers, &mut ctx);
    }
    ctx
}

fn header_str<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

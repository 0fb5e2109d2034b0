//! Configuration validation.
//!
//! Serde already rejects unknown protocols and malformed trusted networks;
//! this pass checks the semantic invariants that depend on several fields.
//! All errors are collected, not just the first.

use thiserror::Error;
use url::Url;

use crate::config::schema::{PolicyConfig, Protocol};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listen.port must be non-zero for tcp listeners")]
    MissingListenPort,

    #[error("listen.path is required for unix listeners")]
    MissingListenPath,

    #[error("upstream.url `{url}` is invalid: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },

    #[error("upstream.url scheme `{0}` is not supported (expected http or https)")]
    UnsupportedScheme(String),

    #[error("upstream.socketPath is required for unix upstreams")]
    MissingSocketPath,
}

pub fn validate_config(config: &PolicyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.listen.protocol {
        Protocol::Tcp if config.listen.port == 0 => errors.push(ValidationError::MissingListenPort),
        Protocol::Unix if config.listen.path.is_empty() => {
            errors.push(ValidationError::MissingListenPath)
        }
        _ => {}
    }

    if let Err(e) = parse_upstream_url(&config.upstream.url) {
        errors.push(e);
    }

    if config.upstream.protocol == Protocol::Unix && config.upstream.socket_path.is_empty() {
        errors.push(ValidationError::MissingSocketPath);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse the upstream base URL, accepting only http and https with a host.
pub fn parse_upstream_url(raw: &str) -> Result<Url, ValidationError> {
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUpstreamUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidUpstreamUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&PolicyConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = PolicyConfig::default();
        config.listen.protocol = Protocol::Unix;
        config.upstream.protocol = Protocol::Unix;
        config.upstream.url = "ftp://example.com".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingListenPath,
                ValidationError::UnsupportedScheme("ftp".to_string()),
                ValidationError::MissingSocketPath,
            ]
        );
    }

    #[test]
    fn rejects_garbage_url() {
        assert!(matches!(
            parse_upstream_url("not a url"),
            Err(ValidationError::InvalidUpstreamUrl { .. })
        ));
    }

    #[test]
    fn tcp_listener_needs_port() {
        let mut config = PolicyConfig::default();
        config.listen.port = 0;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::MissingListenPort])
        );
    }
}

//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::PolicyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// On-disk encoding, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Load and validate a configuration file. Does not install it anywhere.
pub fn load_config(path: &Path) -> Result<PolicyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, ConfigFormat::from_path(path))
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<PolicyConfig, ConfigError> {
    let config: PolicyConfig = match format {
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Protocol, TrustedNetwork};

    #[test]
    fn parses_json_with_legacy_names() {
        let raw = r#"{
            "server": {
                "protocol": "tcp",
                "address": "0.0.0.0",
                "port": 3001,
                "readTimeout": 10,
                "debug": true
            },
            "proxy": {
                "protocol": "unix",
                "unixPath": "/run/backend.sock",
                "url": "http://localhost",
                "timeout": 5,
                "forceAttemptHttp2": true
            },
            "limit": {
                "maxBodySize": 65536,
                "cc": 5,
                "mentions": 3,
                "keywords": ["spam"]
            },
            "inboundProxyNetworks": ["10.0.0.0/8", "192.0.2.1"]
        }"#;

        let config = parse_config(raw, ConfigFormat::Json).unwrap();
        assert_eq!(config.listen.port, 3001);
        assert!(config.listen.debug);
        assert_eq!(config.upstream.protocol, Protocol::Unix);
        assert_eq!(config.upstream.socket_path, "/run/backend.sock");
        assert_eq!(config.upstream.dial_timeout, 5);
        assert!(config.upstream.force_attempt_http2);
        assert_eq!(config.limits.max_cc, 5);
        assert_eq!(config.limits.max_mentions, 3);
        assert_eq!(config.limits.keywords, vec!["spam".to_string()]);
        assert_eq!(
            config.trusted_proxy_networks,
            vec![
                "10.0.0.0/8".parse::<TrustedNetwork>().unwrap(),
                "192.0.2.1".parse::<TrustedNetwork>().unwrap(),
            ]
        );
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
            trustedProxyNetworks = ["127.0.0.1"]

            [listen]
            port = 9000

            [upstream]
            url = "https://social.example"

            [limits]
            maxCc = 12
        "#;

        let config = parse_config(raw, ConfigFormat::Toml).unwrap();
        assert_eq!(config.listen.port, 9000);
        assert_eq!(config.upstream.url, "https://social.example");
        assert_eq!(config.limits.max_cc, 12);
        assert_eq!(config.limits.max_mentions, 20);
    }

    #[test]
    fn unknown_protocol_is_an_error() {
        let raw = r#"{"listen": {"protocol": "udp"}}"#;
        assert!(matches!(
            parse_config(raw, ConfigFormat::Json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_upstream_is_a_validation_error() {
        let raw = r#"{"upstream": {"url": "gopher://old.example"}}"#;
        assert!(matches!(
            parse_config(raw, ConfigFormat::Json),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/config.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("config.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Json);
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and the config store
//! - Start the config watcher and the signal handler
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: a bad config, upstream or listener is fatal
//! - Subsystems initialize in order, not concurrently
//! - A watcher that cannot start only disables hot reload

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::shutdown::Shutdown;
use super::signals::spawn_signal_handler;
use crate::config::{load_config, ConfigError, ConfigStore, ConfigWatcher, Protocol};
use crate::http::HttpServer;
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("upstream error: {0}")]
    Upstream(#[from] TransportError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Run the gateway until a shutdown signal has been handled.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    // 1. Configuration (logging waits for the configured level)
    let loaded = load_config(config_path);
    let level = loaded
        .as_ref()
        .map(|config| config.observability.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    logging::init_logging(&level);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        listen = %config.listen.protocol,
        upstream = %config.upstream.url,
        "fedi-gateway starting"
    );

    // 2. Metrics
    if let Some(address) = &config.observability.metrics_address {
        match address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(metrics_address = %address, "Failed to parse metrics address"),
        }
    }

    // 3. Store and server
    let listen = config.listen.clone();
    let store = Arc::new(ConfigStore::new(config));
    let server = HttpServer::new(store.clone());
    server.prepare_transport()?;

    // 4. Hot reload
    let (watcher, updates) = ConfigWatcher::new(config_path);
    let _watcher = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Failed to watch configuration; hot reload disabled");
            None
        }
    };
    tokio::spawn(store.clone().apply_updates(updates));

    // 5. Listener
    let (listener, owned_socket) = match Listener::inherited(&listen)? {
        Some(listener) => {
            tracing::info!(address = %listener.describe(), "Using inherited listener");
            (listener, None)
        }
        None => {
            let listener = Listener::bind(&listen).await?;
            let socket = (listen.protocol == Protocol::Unix).then(|| PathBuf::from(&listen.path));
            (listener, socket)
        }
    };

    // 6. Serve until signalled
    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());
    server.run(listener, shutdown).await;

    if let Some(path) = owned_socket {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "Failed to remove socket file");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

//! OS signal handling.
//!
//! SIGINT (and SIGTERM, as sent by service managers) trigger graceful
//! shutdown. Configuration reloads are driven by file events, not signals.

use tokio::signal::unix::{signal, SignalKind};

use crate::lifecycle::shutdown::Shutdown;

/// Wait for an interrupt or terminate signal and return its name.
pub async fn wait_for_signal() -> &'static str {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            None
        }
    };

    let sigterm = async {
        match terminate.as_mut() {
            Some(s) => {
                s.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = sigterm => "SIGTERM",
    }
}

/// Trigger `shutdown` on the first signal.
pub fn spawn_signal_handler(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        tracing::info!(signal = name, "Shutdown signal received");
        shutdown.trigger();
    })
}

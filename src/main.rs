//! fedi-gateway
//!
//! An inspecting reverse proxy for ActivityPub servers.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                  FEDI-GATEWAY                 │
//!                         │                                               │
//!     Client Request      │  ┌──────────┐   ┌──────────┐   ┌──────────┐   │
//!     ────────────────────┼─▶│   net    │──▶│  http    │──▶│  policy  │   │
//!                         │  │ listener │   │  server  │   │inspector │   │
//!                         │  └──────────┘   └──────────┘   └────┬─────┘   │
//!                         │                                     │ pass    │
//!                         │                                     ▼         │
//!     Client Response     │  ┌──────────┐   ┌──────────┐   ┌──────────┐   │
//!     ◀───────────────────┼──│ response │◀──│  proxy   │◀──│transport │◀──┼──── Upstream
//!                         │  │ envelope │   │ handler  │   │  client  │   │
//!                         │  └──────────┘   └──────────┘   └──────────┘   │
//!                         │                                               │
//!                         │  config (store + watcher) · security (trust)  │
//!                         │  observability · lifecycle (signals, drain)   │
//!                         └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use fedi_gateway::lifecycle::startup;

/// Inspecting reverse proxy for ActivityPub servers.
#[derive(Debug, Parser)]
#[command(name = "fedi-gateway", version, about)]
struct Args {
    /// Path to the configuration file (JSON, or TOML with a .toml extension).
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    startup::run(&args.config).await?;
    Ok(())
}

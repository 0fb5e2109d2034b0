//! Upstream transport.
//!
//! # Data Flow
//! ```text
//! Snapshot (upstream section)
//!     → client.rs (TransportCache: reuse or build)
//!     → client.rs (hyper client, TLS via rustls when the URL is https)
//!     → connector.rs (dial tcp or unix, apply socket tunables)
//! ```

pub mod client;
pub mod connector;

pub use client::{Transport, TransportCache, TransportError};
pub use connector::{DialError, DialTarget, UpstreamConnector};

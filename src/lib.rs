//! Inspecting reverse proxy for federated social servers.
//!
//! Sits in front of an ActivityPub server, drops activities that break the
//! configured limits (cc fan-out, mentions, denied keywords) and forwards
//! everything else unchanged.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod policy;
pub mod security;
pub mod transport;

pub use config::{ConfigStore, PolicyConfig};
pub use http::HttpServer;
pub use lifecycle::Shutdown;

//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming tcp or unix connection (or inherited socket)
//!     → listener.rs (bind/adopt, accept, peer address)
//!     → connection.rs (connection id, drain tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - One task per connection, no accept-side pool
//! - Each connection tracked for graceful shutdown
//! - TLS is terminated elsewhere

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Connection, Listener, ListenerError, PeerAddr};

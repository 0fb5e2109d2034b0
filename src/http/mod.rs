//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! tcp or unix connection
//!     → server.rs (hyper auto builder, request ID, trace, write timeout)
//!     → proxy.rs (snapshot, client identity, inspection)
//!     → request.rs (body buffering, outbound rewrite)
//!     → transport (dispatch upstream)
//!     → response.rs (relay, or synthesize the JSON envelope)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};

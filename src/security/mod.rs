//! Client trust and header hygiene.
//!
//! # Data Flow
//! ```text
//! Accepted request (peer address)
//!     → trusted_proxy.rs (trust check, client recovery)
//!     → headers.rs (hop-by-hop strip, X-Forwarded-* folding)
//!     → Upstream request
//! ```

pub mod headers;
pub mod trusted_proxy;

pub use trusted_proxy::{is_trusted, recover_client_context, resolve_client, ClientContext};

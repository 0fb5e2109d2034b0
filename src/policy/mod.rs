//! Content policy for inbound activities.
//!
//! # Data Flow
//! ```text
//! Request head
//!     → inspector.rs (needs_inspection: method, path, content type, size)
//!     → buffered body
//!     → activity.rs (typed view of the JSON)
//!     → inspector.rs (evaluate: cc, mentions, keywords)
//!     → verdict.rs (Pass or Reject)
//! ```

pub mod activity;
pub mod inspector;
pub mod verdict;

pub use activity::Activity;
pub use inspector::{evaluate, needs_inspection};
pub use verdict::{Finding, Rejection, Rule, Verdict};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON/TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PolicyConfig (validated, immutable)
//!     → store.rs (Arc snapshot read by every request)
//!
//! On file write:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → store.rs swaps the Arc<PolicyConfig>
//!     → the next request observes the new snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - A failed reload is logged and the previous snapshot stays active
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    LimitConfig, ListenConfig, PolicyConfig, Protocol, ServerTimeouts, TrustedNetwork,
    UpstreamConfig,
};
pub use store::ConfigStore;
pub use watcher::ConfigWatcher;

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, EDGE_* overrides)
//!     → validation.rs (semantic checks)
//!     → EdgeConfig (validated, immutable)
//!     → published through ArcSwap to request handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs keeps startup-only settings at their running values
//!     → atomic swap of Arc<EdgeConfig>
//!     → next request observes new config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::EdgeConfig;
pub use schema::{
    AdminConfig, ContentConfig, CookieConfig, Environment, ExperimentsConfig, ListenerConfig,
    ObservabilityConfig, RegistryConfig, RevalidationConfig, TimeoutConfig,
};

//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config file or defaults → EDGE_* overrides → Validate
//!
//! Shutdown (shutdown.rs):
//!     Trigger → server drains → refresher and reload tasks exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: an invalid startup config is fatal
//! - One broadcast channel reaches every background task

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;

//! Experiment subsystem.
//!
//! # Data Flow
//! ```text
//! Data server /experiments
//!     → registry.rs (fetch, snapshot, max-age reuse)
//!     → Arc<ExperimentSet> handed to each request
//!     → bucketing.rs (existing cookie + randomness → Variant)
//!     → resolver.rs (Variant → VariantConfig for rendering)
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; a refresh publishes a new one atomically
//! - Bucketing is pure and takes an injected randomness source
//! - Unknown or paused experiments resolve to the control variant

pub mod bucketing;
pub mod registry;
pub mod resolver;
pub mod types;

pub use bucketing::{assign, resolve_for, Assignment, FixedRandom, RandomSource, SeededRandom, ThreadRandom};
pub use registry::{ExperimentRegistry, ExperimentSource, HttpExperimentSource, StaticExperimentSource};
pub use resolver::{config_for, read_variant};
pub use types::{ExperimentDefinition, ExperimentSet, ExperimentStatus, Variant, VariantConfig, VariantSet};

//! Variant assignment.
//!
//! # Responsibilities
//! - Keep an existing valid assignment (stickiness)
//! - Draw a fresh variant according to traffic allocation
//! - Fall back to the control variant for unknown or paused experiments
//!
//! # Design Decisions
//! - Pure function of (experiment, existing value, randomness)
//! - Randomness is injected so tests can fix outcomes exactly
//! - Stickiness wins over re-randomization even after allocation changes

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::experiments::types::{ExperimentDefinition, ExperimentSet, Variant};

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
    fn next_unit(&self) -> f64;
}

/// Thread-local OS-seeded randomness for production traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Deterministic randomness for tests and replays.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0
    }
}

/// Outcome of resolving one experiment for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub variant: Variant,
    /// True when the variant was drawn now and must be persisted.
    pub fresh: bool,
}

impl Assignment {
    pub fn sticky(variant: Variant) -> Self {
        Self { variant, fresh: false }
    }

    /// Default used when the experiment cannot be evaluated. Never persisted.
    pub fn default_variant() -> Self {
        Self::sticky(Variant::A)
    }
}

/// Assign a variant for `experiment`, honoring a valid existing cookie value.
pub fn assign(
    experiment: &ExperimentDefinition,
    existing: Option<&str>,
    rng: &dyn RandomSource,
) -> Assignment {
    if let Some(variant) = existing.and_then(|v| v.parse::<Variant>().ok()) {
        return Assignment::sticky(variant);
    }

    let r = rng.next_unit();
    let variant = if r < experiment.allocation_ratio() {
        Variant::A
    } else {
        Variant::B
    };

    Assignment { variant, fresh: true }
}

/// Resolve by id against a snapshot; unknown or inactive experiments get the default.
pub fn resolve_for(
    snapshot: &ExperimentSet,
    experiment_id: &str,
    existing: Option<&str>,
    rng: &dyn RandomSource,
) -> Assignment {
    match snapshot.get(experiment_id) {
        Some(experiment) if experiment.is_active() => assign(experiment, existing, rng),
        _ => Assignment::default_variant(),
    }
}

//! Experiment definitions and variant types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the two treatments of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Variant {
    /// Control.
    #[default]
    A,
    /// Treatment.
    B,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cookie or header value that is not one of the two variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid variant value '{0}'")]
pub struct VariantParseError(pub String);

impl FromStr for Variant {
    type Err = VariantParseError;

    /// Exact match only; "a" or " A" are rejected like any other junk value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Variant::A),
            "B" => Ok(Variant::B),
            other => Err(VariantParseError(other.to_string())),
        }
    }
}

/// Lifecycle state of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Active,
    Paused,
}

/// Render configuration attached to a variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout_type: Option<String>,
}

/// Both variants of an experiment. Exactly two, by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSet {
    #[serde(rename = "A")]
    pub a: VariantConfig,
    #[serde(rename = "B")]
    pub b: VariantConfig,
}

impl VariantSet {
    pub fn get(&self, variant: Variant) -> &VariantConfig {
        match variant {
            Variant::A => &self.a,
            Variant::B => &self.b,
        }
    }
}

/// A single A/B experiment as published by the data server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: ExperimentStatus,
    /// Percent chance of drawing "A" on a fresh assignment.
    pub traffic_allocation: f64,
    pub variants: VariantSet,
    pub cookie_name: String,
    pub cookie_duration_days: u32,
    /// Whether the variant selects the template tree.
    #[serde(default)]
    pub routing: bool,
}

impl ExperimentDefinition {
    pub fn is_active(&self) -> bool {
        self.status == ExperimentStatus::Active
    }

    /// Allocation as a probability in [0, 1].
    pub fn allocation_ratio(&self) -> f64 {
        if self.traffic_allocation.is_nan() {
            return 0.0;
        }
        (self.traffic_allocation / 100.0).clamp(0.0, 1.0)
    }
}

/// Immutable snapshot of every experiment known to the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSet {
    pub experiments: BTreeMap<String, ExperimentDefinition>,
}

impl ExperimentSet {
    pub fn get(&self, id: &str) -> Option<&ExperimentDefinition> {
        self.experiments.get(id)
    }

    /// Active experiments only, in id order.
    pub fn active(&self) -> impl Iterator<Item = &ExperimentDefinition> {
        self.experiments.values().filter(|e| e.is_active())
    }

    /// The experiment that drives path routing, if any is active.
    ///
    /// An explicitly configured id wins over the `routing` flag. When several
    /// experiments carry the flag, the lowest id is chosen.
    pub fn routing_experiment(&self, configured: Option<&str>) -> Option<&ExperimentDefinition> {
        if let Some(id) = configured {
            if let Some(exp) = self.get(id).filter(|e| e.is_active()) {
                return Some(exp);
            }
        }
        self.active().find(|e| e.routing)
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration for the storefront edge.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Where experiment definitions come from and how long a snapshot lives.
    pub registry: RegistryConfig,

    /// Assignment middleware scope and header mapping.
    pub experiments: ExperimentsConfig,

    /// Sticky cookie attributes.
    pub cookies: CookieConfig,

    /// Upstream content source feeding the tagged cache.
    pub content: ContentConfig,

    /// Revalidation gateway settings.
    pub revalidation: RevalidationConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Experiment registry source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Full URL of the experiments document.
    pub url: String,

    /// Deadline for a single registry fetch in milliseconds.
    pub fetch_timeout_ms: u64,

    /// How long a fetched snapshot is served before the next request refetches it.
    /// Zero means every request fetches.
    pub max_age_secs: u64,

    /// Background refresh interval in seconds. Zero disables the refresher.
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001/experiments".to_string(),
            fetch_timeout_ms: 2_000,
            max_age_secs: 30,
            refresh_interval_secs: 0,
        }
    }
}

/// Assignment middleware configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExperimentsConfig {
    /// Only requests under this path prefix are bucketed.
    pub scope_prefix: String,

    /// Experiment whose variant selects the template tree.
    pub routing_experiment: Option<String>,

    /// Template tree served to the routing experiment's "B" variant.
    pub alternate_prefix: String,

    /// Request header carrying each experiment's variant downstream.
    pub variant_headers: BTreeMap<String, String>,
}

impl ExperimentsConfig {
    /// Header name for an experiment, falling back to `x-ab-<id>`.
    pub fn header_for(&self, experiment_id: &str) -> String {
        self.variant_headers
            .get(experiment_id)
            .cloned()
            .unwrap_or_else(|| format!("x-ab-{}", experiment_id))
    }
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        let mut variant_headers = BTreeMap::new();
        variant_headers.insert("add-to-cart-button".to_string(), "x-ab-variant".to_string());
        variant_headers.insert("product-layout".to_string(), "x-ab-layout-variant".to_string());

        Self {
            scope_prefix: "/product/".to_string(),
            routing_experiment: Some("product-layout".to_string()),
            alternate_prefix: "/product/variant-b/".to_string(),
            variant_headers,
        }
    }
}

/// Deployment environment, drives the cookie `Secure` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Sticky cookie attributes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    pub environment: Environment,

    /// Cookie `Path` attribute.
    pub path: String,
}

impl CookieConfig {
    pub fn secure(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            path: "/".to_string(),
        }
    }
}

/// Upstream content source (CMS documents).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Base URL of the data server.
    pub url: String,

    /// Deadline for a single content fetch in milliseconds.
    pub fetch_timeout_ms: u64,

    /// Optional TTL for cached documents. None keeps them until invalidated.
    pub ttl_secs: Option<u64>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".to_string(),
            fetch_timeout_ms: 5_000,
            ttl_secs: None,
        }
    }
}

/// Revalidation gateway configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RevalidationConfig {
    /// Shared secret callers must present.
    pub secret: String,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            secret: "your-secret-key".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:3081".to_string(),
        }
    }
}

//! Startup configuration.
//!
//! # Responsibilities
//! - Load the config file when one is given
//! - Otherwise start from defaults, still honouring `EDGE_*` overrides
//! - Refuse to start on an invalid configuration

use std::path::Path;

use crate::config::loader::{apply_env_overrides, load_config, ConfigError};
use crate::config::validation::validate_config;
use crate::config::EdgeConfig;

/// Resolve the configuration the process starts with.
pub fn startup_config(path: Option<&Path>) -> Result<EdgeConfig, ConfigError> {
    match path {
        Some(path) => {
            let config = load_config(path)?;
            tracing::info!(path = %path.display(), "Configuration loaded");
            Ok(config)
        }
        None => {
            let mut config = EdgeConfig::default();
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            validate_config(&config).map_err(ConfigError::Validation)?;
            tracing::info!("No config file given, using defaults");
            Ok(config)
        }
    }
}

//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{EdgeConfig, Environment};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<EdgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate.
pub fn parse_config(content: &str) -> Result<EdgeConfig, ConfigError> {
    let mut config: EdgeConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay `EDGE_*` variables on top of file values.
///
/// `lookup` is injected so tests do not touch the process environment.
pub fn apply_env_overrides<F>(config: &mut EdgeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(secret) = lookup("EDGE_REVALIDATION_SECRET") {
        config.revalidation.secret = secret;
    }
    if let Some(base) = lookup("EDGE_DATA_SERVER_URL") {
        let base = base.trim_end_matches('/').to_string();
        config.registry.url = format!("{}/experiments", base);
        config.content.url = base;
    }
    if let Some(env) = lookup("EDGE_ENV") {
        config.cookies.environment = if env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [revalidation]
            secret = "s3cret"

            [registry]
            url = "http://cms.internal/experiments"
            max_age_secs = 0
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.revalidation.secret, "s3cret");
        assert_eq!(config.registry.max_age_secs, 0);
    }

    #[test]
    fn test_validation_error_surfaces() {
        let err = parse_config("[timeouts]\nrequest_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("timeouts.request_secs"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EdgeConfig::default();
        apply_env_overrides(&mut config, |key| match key {
            "EDGE_DATA_SERVER_URL" => Some("http://data:4000/".to_string()),
            "EDGE_ENV" => Some("Production".to_string()),
            _ => None,
        });

        assert_eq!(config.registry.url, "http://data:4000/experiments");
        assert_eq!(config.content.url, "http://data:4000");
        assert!(config.cookies.secure());
        assert_eq!(config.revalidation.secret, "your-secret-key");
    }
}

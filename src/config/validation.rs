//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check path prefixes are well formed and nested
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check configured header names are legal HTTP header names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::EdgeConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must start with '/': got '{value}'")]
    RelativePath { field: &'static str, value: String },

    #[error("alternate_prefix '{alternate}' must lie inside scope_prefix '{scope}'")]
    AlternateOutsideScope { alternate: String, scope: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is not a valid URL: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("invalid header name '{header}' for experiment '{experiment}'")]
    InvalidHeader { experiment: String, header: String },
}

/// Validate an entire configuration, collecting every error.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "listener.bind_address" });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero { field: "timeouts.request_secs" });
    }

    check_url(&mut errors, "registry.url", &config.registry.url);
    if config.registry.fetch_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "registry.fetch_timeout_ms" });
    }

    check_url(&mut errors, "content.url", &config.content.url);
    if config.content.fetch_timeout_ms == 0 {
        errors.push(ValidationError::Zero { field: "content.fetch_timeout_ms" });
    }

    let experiments = &config.experiments;
    check_absolute(&mut errors, "experiments.scope_prefix", &experiments.scope_prefix);
    check_absolute(&mut errors, "experiments.alternate_prefix", &experiments.alternate_prefix);
    if !experiments.alternate_prefix.starts_with(&experiments.scope_prefix) {
        errors.push(ValidationError::AlternateOutsideScope {
            alternate: experiments.alternate_prefix.clone(),
            scope: experiments.scope_prefix.clone(),
        });
    }
    for (experiment, header) in &experiments.variant_headers {
        if HeaderName::from_bytes(header.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeader {
                experiment: experiment.clone(),
                header: header.clone(),
            });
        }
    }

    if config.revalidation.secret.is_empty() {
        errors.push(ValidationError::Empty { field: "revalidation.secret" });
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::Empty { field: "admin.api_key" });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_absolute(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::RelativePath {
            field,
            value: value.to_string(),
        });
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if url::Url::parse(value).is_err() {
        errors.push(ValidationError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
}

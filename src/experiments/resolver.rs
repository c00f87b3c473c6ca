//! Variant config lookup and the downstream read side of assignments.

use axum::http::HeaderMap;

use crate::experiments::types::{ExperimentSet, Variant, VariantConfig};

/// Render config for `variant` of `experiment_id`. `None` means "use a hardcoded default".
pub fn config_for<'a>(
    snapshot: &'a ExperimentSet,
    experiment_id: &str,
    variant: Variant,
) -> Option<&'a VariantConfig> {
    snapshot
        .get(experiment_id)
        .map(|experiment| experiment.variants.get(variant))
}

/// Variant as seen by a downstream handler: header first, then cookie, else "A".
pub fn read_variant(headers: &HeaderMap, header_name: &str, cookie_value: Option<&str>) -> Variant {
    let from_header = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Variant>().ok());

    from_header
        .or_else(|| cookie_value.and_then(|v| v.parse::<Variant>().ok()))
        .unwrap_or_default()
}

impl VariantConfig {
    /// Button rendering when the registry has nothing to say.
    pub fn default_button() -> Self {
        Self {
            name: "Default".to_string(),
            description: "Fallback add-to-cart button".to_string(),
            button_color: Some("blue".to_string()),
            button_text: Some("Add to Cart".to_string()),
            layout_type: None,
        }
    }

    /// Layout rendering when the registry has nothing to say.
    pub fn default_layout() -> Self {
        Self {
            name: "Default".to_string(),
            description: "Fallback product layout".to_string(),
            button_color: None,
            button_text: None,
            layout_type: Some("classic".to_string()),
        }
    }
}

//! Storefront product pages.
//!
//! # Data Flow
//! ```text
//! Request (already through assignment)
//!     → variant headers (read_variant)
//!     → registry snapshot (VariantConfig, or hardcoded defaults)
//!     → ContentService (header/footer/site config, null on failure)
//!     → ProductPage, cached per path and variant unless degraded
//! ```
//!
//! # Design Decisions
//! - Handlers never fetch the registry themselves; they read the snapshot the
//!   middleware just refreshed
//! - A page missing CMS content is served but never cached
//! - A page whose inputs were revalidated while it was being built is served
//!   to this request only

pub mod pages;

pub use pages::{PageCache, PageTicket, PageVariant, ProductPage};

use arc_swap::ArcSwap;
use axum::{
    extract::{Path, State},
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::cache::ContentService;
use crate::config::EdgeConfig;
use crate::experiments::{config_for, read_variant, ExperimentRegistry, ExperimentSet, Variant, VariantConfig};
use crate::http::cookies::read_cookie;
use crate::http::middleware::AssignmentContext;

/// Experiment driving the add-to-cart button.
pub const BUTTON_EXPERIMENT: &str = "add-to-cart-button";

/// Layout experiment id used when no routing experiment is configured.
pub const LAYOUT_EXPERIMENT: &str = "product-layout";

/// Shared state for page handlers.
#[derive(Clone)]
pub struct StorefrontState {
    pub config: Arc<ArcSwap<EdgeConfig>>,
    pub registry: Arc<ExperimentRegistry>,
    pub content: ContentService,
    pub pages: Arc<PageCache>,
}

pub fn router(state: StorefrontState) -> Router {
    Router::new()
        .route("/product/variant-b/{slug}", get(variant_b_page))
        .route("/product/{slug}", get(product_page))
        .with_state(state)
}

#[derive(Clone, Copy)]
enum Template {
    Default,
    VariantB,
}

impl Template {
    fn name(self) -> &'static str {
        match self {
            Template::Default => "default",
            Template::VariantB => "variant-b",
        }
    }
}

async fn product_page(
    State(state): State<StorefrontState>,
    Path(slug): Path<String>,
    request: Parts,
) -> Response {
    render(&state, Template::Default, slug, &request).await
}

async fn variant_b_page(
    State(state): State<StorefrontState>,
    Path(slug): Path<String>,
    request: Parts,
) -> Response {
    render(&state, Template::VariantB, slug, &request).await
}

async fn render(state: &StorefrontState, template: Template, slug: String, request: &Parts) -> Response {
    let headers = &request.headers;
    let config = state.config.load_full();
    let snapshot = state.registry.snapshot().unwrap_or_default();

    let layout_id = config
        .experiments
        .routing_experiment
        .clone()
        .unwrap_or_else(|| LAYOUT_EXPERIMENT.to_string());

    let button_variant = variant_from(&snapshot, headers, &config.experiments.header_for(BUTTON_EXPERIMENT), BUTTON_EXPERIMENT);
    let layout_variant = match template {
        Template::VariantB => Variant::B,
        Template::Default => variant_from(&snapshot, headers, &config.experiments.header_for(&layout_id), &layout_id),
    };

    let button = config_for(&snapshot, BUTTON_EXPERIMENT, button_variant)
        .cloned()
        .unwrap_or_else(VariantConfig::default_button);
    let layout = config_for(&snapshot, &layout_id, layout_variant)
        .cloned()
        .unwrap_or_else(VariantConfig::default_layout);

    let served_path = request.uri.path();
    let variant = PageVariant::new(button_variant, layout_variant, &button, &layout);
    if let Some(page) = state.pages.get(served_path, &variant) {
        return Json(&*page).into_response();
    }

    let ticket = state.pages.ticket();
    let (header, footer, site_config) = tokio::join!(
        state.content.header(),
        state.content.footer(),
        state.content.site_config(),
    );

    let page = ProductPage {
        slug,
        template: template.name(),
        layout_variant,
        button_variant,
        button,
        layout,
        header: header.ok(),
        footer: footer.ok(),
        site_config: site_config.ok(),
    };

    if !page.is_complete() {
        tracing::warn!(path = %served_path, "Rendering without CMS content");
        return Json(&page).into_response();
    }

    let mut paths = vec![served_path];
    let context = request.extensions.get::<AssignmentContext>();
    if let Some(original) = context.and_then(|c| c.rewritten_from.as_deref()) {
        paths.push(original);
    }
    let page = Arc::new(page);
    if !state.pages.store(&ticket, &paths, page.clone()) {
        tracing::debug!(path = %served_path, "Page inputs revalidated during render, not cached");
    }
    Json(&*page).into_response()
}

/// Header first, then the experiment's own cookie, else "A".
fn variant_from(snapshot: &ExperimentSet, headers: &HeaderMap, header_name: &str, experiment_id: &str) -> Variant {
    let cookie = snapshot
        .get(experiment_id)
        .and_then(|experiment| read_cookie(headers, &experiment.cookie_name));
    read_variant(headers, header_name, cookie)
}

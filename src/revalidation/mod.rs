//! Revalidation subsystem.
//!
//! # Data Flow
//! ```text
//! CMS webhook / operator
//!     → handlers.rs (POST JSON batch or GET query)
//!     → gateway.rs (secret check, entry validation)
//!     → tags  → content TaggedCache::invalidate_by_tag
//!     → paths → PathRevalidator (page cache, separate key space)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a bad secret rejects the whole request before any mutation
//! - Malformed batch entries are skipped and reported, never fatal
//! - Secret comparison is constant-time over the full string

pub mod gateway;
pub mod handlers;

pub use gateway::{
    PathRevalidator, RevalidateRequest, RevalidationError, RevalidationGateway, RevalidationOutcome,
    SkippedEntry,
};

use axum::{routing::get, Router};
use std::sync::Arc;

/// Routes for `/api/revalidate`.
pub fn router(gateway: Arc<RevalidationGateway>) -> Router {
    Router::new()
        .route(
            "/api/revalidate",
            get(handlers::revalidate_single).post(handlers::revalidate_batch),
        )
        .with_state(gateway)
}

//! Operator API.
//!
//! Served on its own listener, behind a Bearer key:
//! - `GET /admin/status`: version, registry freshness
//! - `GET /admin/experiments`: current snapshot summary
//! - `GET /admin/cache`: content and page cache counters
//! - `POST /admin/registry/refresh`: refetch experiment definitions now

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/experiments", get(get_experiments))
        .route("/admin/cache", get(get_cache))
        .route("/admin/registry/refresh", post(refresh_registry))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

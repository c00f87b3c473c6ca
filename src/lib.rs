//! Storefront edge: A/B experiment assignment and tagged content caching.

pub mod admin;
pub mod cache;
pub mod config;
pub mod experiments;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod revalidation;
pub mod storefront;

pub use config::EdgeConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers, graceful shutdown)
//!     → request.rs (request ID, tracing span)
//!     → middleware/assignment.rs (variants, cookies, routing rewrite)
//!     → storefront / revalidation handlers
//!
//! Outbound:
//!     upstream.rs (data server JSON fetches for registry and content)
//! ```

pub mod cookies;
pub mod middleware;
pub mod request;
pub mod server;
pub mod upstream;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{build_app, AppState, HttpServer};
pub use upstream::{UpstreamClient, UpstreamError};

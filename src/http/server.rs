//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the application: storefront pages, revalidation endpoint
//! - Run assignment in front of routing so rewrites pick the route
//! - Wire up middleware (tracing, request ID, timeout, body limit, concurrency)
//! - Own background tasks: config reload consumer, registry refresher
//! - Serve with graceful shutdown
//!
//! # Layer order (outermost first)
//! ```text
//! SetRequestId → Trace → PropagateRequestId → body limit → concurrency
//!     → timeout → request metrics → assignment → Router
//! ```

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::Layer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{ContentCache, ContentService, TaggedCache};
use crate::config::EdgeConfig;
use crate::experiments::{ExperimentRegistry, RandomSource, ThreadRandom};
use crate::http::middleware::{assignment_middleware, AssignmentState};
use crate::http::request::{make_span, UuidRequestId};
use crate::http::upstream::UpstreamClient;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::revalidation::{self, RevalidationGateway};
use crate::storefront::{self, PageCache, StorefrontState};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared handles for every subsystem.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ArcSwap<EdgeConfig>>,
    pub registry: Arc<ExperimentRegistry>,
    pub content: ContentService,
    pub pages: Arc<PageCache>,
    pub gateway: Arc<RevalidationGateway>,
    pub rng: Arc<dyn RandomSource>,
}

impl AppState {
    /// Production wiring: HTTP registry and OS randomness.
    pub fn from_config(config: EdgeConfig) -> Self {
        let client = UpstreamClient::new();
        let registry = Arc::new(ExperimentRegistry::from_config(&config.registry, client.clone()));
        Self::with_parts(config, registry, Arc::new(ThreadRandom), client)
    }

    /// Wiring with an injected registry and randomness source.
    pub fn new(config: EdgeConfig, registry: Arc<ExperimentRegistry>, rng: Arc<dyn RandomSource>) -> Self {
        Self::with_parts(config, registry, rng, UpstreamClient::new())
    }

    fn with_parts(
        config: EdgeConfig,
        registry: Arc<ExperimentRegistry>,
        rng: Arc<dyn RandomSource>,
        client: UpstreamClient,
    ) -> Self {
        let content_cache: Arc<ContentCache> = Arc::new(TaggedCache::new("content"));
        let content = ContentService::new(content_cache.clone(), client, &config.content);
        let pages = Arc::new(PageCache::new());
        let gateway = Arc::new(RevalidationGateway::new(
            config.revalidation.secret.clone(),
            content_cache,
            pages.clone(),
        ));

        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            registry,
            content,
            pages,
            gateway,
            rng,
        }
    }

    /// Publish a reloaded configuration to subsequent requests.
    pub fn apply_config(&self, config: EdgeConfig) {
        self.config.store(Arc::new(config));
        tracing::info!("Configuration reloaded");
    }
}

/// HTTP server for the storefront edge.
pub struct HttpServer {
    state: AppState,
    app: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let app = build_app(&state);
        Self { state, app }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The assembled application, for in-process use.
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    /// Serve until `shutdown` fires. Config updates are applied as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<EdgeConfig>>,
        shutdown: Arc<Shutdown>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(updates) = config_updates {
            tokio::spawn(consume_config_updates(self.state.clone(), updates, shutdown.subscribe()));
        }

        let config = self.state.config.load_full();
        if config.registry.refresh_interval_secs > 0 {
            let interval = Duration::from_secs(config.registry.refresh_interval_secs);
            tokio::spawn(self.state.registry.clone().run_refresher(interval, shutdown.subscribe()));
        }

        let mut stop = shutdown.subscribe();
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the full application router from shared state.
#[allow(deprecated)]
pub fn build_app(state: &AppState) -> Router {
    let config = state.config.load_full();

    let routes = Router::new()
        .merge(storefront::router(StorefrontState {
            config: state.config.clone(),
            registry: state.registry.clone(),
            content: state.content.clone(),
            pages: state.pages.clone(),
        }))
        .merge(revalidation::router(state.gateway.clone()))
        .fallback(not_found);

    let assignment = middleware::from_fn_with_state(
        AssignmentState {
            registry: state.registry.clone(),
            config: state.config.clone(),
            rng: state.rng.clone(),
        },
        assignment_middleware,
    );

    Router::new()
        .fallback_service(assignment.layer(routes))
        .layer(middleware::from_fn(track_requests))
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(make_span::<Body>))
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
}

async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let response = next.run(request).await;
    metrics::record_request(method.as_str(), response.status().as_u16(), start);
    response
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "Not found" }))).into_response()
}

async fn consume_config_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<EdgeConfig>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => state.apply_config(config),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Config reload consumer stopped");
}

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::experiments::ExperimentStatus;
use crate::http::server::AppState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub registry_loaded: bool,
    /// Seconds since the snapshot was fetched.
    pub registry_age_secs: Option<u64>,
    pub experiments: usize,
}

#[derive(Serialize)]
pub struct ExperimentSummary {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub traffic_allocation: f64,
    pub cookie_name: String,
    pub cookie_duration_days: u32,
    pub routing: bool,
}

#[derive(Serialize)]
pub struct CacheSummary {
    pub content: CacheStats,
    pub pages: CacheStats,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.registry.snapshot();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        registry_loaded: snapshot.is_some(),
        registry_age_secs: state.registry.age().map(|age| age.as_secs()),
        experiments: snapshot.map(|s| s.len()).unwrap_or(0),
    })
}

pub async fn get_experiments(State(state): State<AppState>) -> Json<Vec<ExperimentSummary>> {
    let config = state.config.load_full();
    let Some(snapshot) = state.registry.snapshot() else {
        return Json(Vec::new());
    };

    let routing_id = snapshot
        .routing_experiment(config.experiments.routing_experiment.as_deref())
        .map(|e| e.id.clone());

    let summaries = snapshot
        .experiments
        .values()
        .map(|e| ExperimentSummary {
            id: e.id.clone(),
            name: e.name.clone(),
            status: e.status,
            traffic_allocation: e.traffic_allocation,
            cookie_name: e.cookie_name.clone(),
            cookie_duration_days: e.cookie_duration_days,
            routing: routing_id.as_deref() == Some(e.id.as_str()),
        })
        .collect();

    Json(summaries)
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheSummary> {
    Json(CacheSummary {
        content: state.content.cache().stats(),
        pages: state.pages.stats(),
    })
}

pub async fn refresh_registry(State(state): State<AppState>) -> Response {
    match state.registry.refresh().await {
        Ok(snapshot) => {
            tracing::info!(experiments = snapshot.len(), "Registry refreshed by operator");
            Json(serde_json::json!({ "refreshed": true, "experiments": snapshot.len() })).into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "refreshed": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

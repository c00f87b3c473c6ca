use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::revalidation::gateway::{
    RevalidateRequest, RevalidationError, RevalidationGateway, SkippedEntry,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub revalidated_tags: Vec<String>,
    pub revalidated_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEntry>,
    pub timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidated_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revalidated_path: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct SingleQuery {
    pub tag: Option<String>,
    pub path: Option<String>,
    pub secret: Option<String>,
}

impl IntoResponse for RevalidationError {
    fn into_response(self) -> Response {
        let status = match self {
            RevalidationError::Unauthorized => StatusCode::UNAUTHORIZED,
            RevalidationError::MissingTarget => StatusCode::BAD_REQUEST,
        };
        error_response(status, &self.to_string())
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `POST /api/revalidate` with `{tags?, paths?, secret}`.
pub async fn revalidate_batch(
    State(gateway): State<Arc<RevalidationGateway>>,
    payload: Result<Json<RevalidateRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Malformed revalidation body");
            return error_response(StatusCode::BAD_REQUEST, "Failed to parse revalidation request");
        }
    };

    match gateway.revalidate(&request) {
        Ok(outcome) => Json(BatchResponse {
            success: true,
            revalidated_tags: outcome.revalidated_tags,
            revalidated_paths: outcome.revalidated_paths,
            skipped: outcome.skipped,
            timestamp: timestamp(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/revalidate?tag=&path=&secret=` for manual use.
pub async fn revalidate_single(
    State(gateway): State<Arc<RevalidationGateway>>,
    Query(query): Query<SingleQuery>,
) -> Response {
    match gateway.revalidate_one(query.secret.as_deref(), query.tag.as_deref(), query.path.as_deref()) {
        Ok(mut outcome) => Json(SingleResponse {
            success: true,
            revalidated_tag: outcome.revalidated_tags.pop(),
            revalidated_path: outcome.revalidated_paths.pop(),
            timestamp: timestamp(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

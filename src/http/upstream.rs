//! Outbound JSON fetches to the data server.
//!
//! # Responsibilities
//! - Issue GET requests through a shared hyper client
//! - Map transport, status and decode failures to one error type
//! - Enforce a per-call deadline
//!
//! # Design Decisions
//! - Single pooled client shared by the registry and content service
//! - Bodies are buffered with a hard cap; documents are small JSON
//! - Timeout errors are distinct from other errors

use axum::body::Body;
use axum::http::{header, Request, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

const MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024;

/// Failure talking to an upstream document source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("invalid upstream URL '{0}'")]
    InvalidUrl(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream timed out after {0} ms")]
    Timeout(u64),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream document could not be decoded: {0}")]
    Decode(String),
}

/// Thin JSON client over hyper-util's pooled connector.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new())
            .build(HttpConnector::new());
        Self { client }
    }

    /// GET `url` and decode the body as `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, UpstreamError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| UpstreamError::InvalidUrl(url.to_string()))?;

        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, "storefront-edge")
            .body(Body::empty())
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;

        let response: hyper::Response<Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_DOCUMENT_BYTES)
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    /// Like [`get_json`](Self::get_json) but bounded by `deadline`.
    pub async fn get_json_within<T: DeserializeOwned>(
        &self,
        url: &str,
        deadline: Duration,
    ) -> Result<T, UpstreamError> {
        match tokio::time::timeout(deadline, self.get_json(url)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(deadline.as_millis() as u64)),
        }
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

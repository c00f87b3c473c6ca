//! Authenticated translation of revalidation batches into cache invalidations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::cache::ContentCache;
use crate::observability::metrics;

/// Refresh hook for the rendering layer's own cache.
pub trait PathRevalidator: Send + Sync {
    /// Drop whatever is cached for `path`. Returns whether anything was dropped.
    fn revalidate_path(&self, path: &str) -> bool;

    /// Drop rendered output built from content carrying `tag`.
    fn revalidate_tag(&self, _tag: &str) -> usize {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevalidationError {
    #[error("Invalid secret")]
    Unauthorized,

    #[error("Please provide either a tag or path parameter")]
    MissingTarget,
}

/// Raw batch as posted by the CMS webhook. Entries are checked one by one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevalidateRequest {
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub paths: Option<Value>,
    #[serde(default)]
    pub secret: Option<Value>,
}

/// A batch entry that was not a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEntry {
    pub field: &'static str,
    pub index: usize,
    pub reason: String,
}

/// What a batch actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidationOutcome {
    pub revalidated_tags: Vec<String>,
    pub revalidated_paths: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

/// Entry point for upstream content-change notifications.
pub struct RevalidationGateway {
    secret: String,
    content: Arc<ContentCache>,
    paths: Arc<dyn PathRevalidator>,
}

impl RevalidationGateway {
    pub fn new(secret: impl Into<String>, content: Arc<ContentCache>, paths: Arc<dyn PathRevalidator>) -> Self {
        Self {
            secret: secret.into(),
            content,
            paths,
        }
    }

    /// Full-string comparison that does not leak the matching prefix length.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), RevalidationError> {
        let presented = presented.ok_or(RevalidationError::Unauthorized)?;
        if bool::from(presented.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            metrics::record_revalidation("unauthorized");
            tracing::warn!("Revalidation rejected: invalid secret");
            Err(RevalidationError::Unauthorized)
        }
    }

    /// Apply a batch. Authorization happens before any invalidation.
    pub fn revalidate(&self, request: &RevalidateRequest) -> Result<RevalidationOutcome, RevalidationError> {
        self.authorize(request.secret.as_ref().and_then(Value::as_str))?;

        let mut outcome = RevalidationOutcome::default();

        for tag in collect_strings("tags", request.tags.as_ref(), &mut outcome.skipped) {
            self.invalidate_tag(&tag);
            outcome.revalidated_tags.push(tag);
        }
        for path in collect_strings("paths", request.paths.as_ref(), &mut outcome.skipped) {
            self.paths.revalidate_path(&path);
            outcome.revalidated_paths.push(path);
        }

        if !outcome.skipped.is_empty() {
            tracing::warn!(skipped = outcome.skipped.len(), "Revalidation batch had malformed entries");
        }
        tracing::info!(
            tags = ?outcome.revalidated_tags,
            paths = ?outcome.revalidated_paths,
            "Revalidation applied"
        );
        metrics::record_revalidation("ok");
        Ok(outcome)
    }

    /// Single tag and/or path, as used by the query-string endpoint.
    pub fn revalidate_one(
        &self,
        secret: Option<&str>,
        tag: Option<&str>,
        path: Option<&str>,
    ) -> Result<RevalidationOutcome, RevalidationError> {
        self.authorize(secret)?;

        // An empty parameter counts as absent.
        let tag = tag.filter(|tag| !tag.is_empty());
        let path = path.filter(|path| !path.is_empty());

        let mut outcome = RevalidationOutcome::default();
        match (tag, path) {
            (Some(tag), _) => {
                self.invalidate_tag(tag);
                outcome.revalidated_tags.push(tag.to_string());
            }
            (None, Some(path)) => {
                self.paths.revalidate_path(path);
                outcome.revalidated_paths.push(path.to_string());
            }
            (None, None) => return Err(RevalidationError::MissingTarget),
        }

        metrics::record_revalidation("ok");
        Ok(outcome)
    }

    /// Content first, then pages rendered from it.
    fn invalidate_tag(&self, tag: &str) {
        self.content.invalidate_by_tag(tag);
        self.paths.revalidate_tag(tag);
    }
}

/// String entries of a batch field. Non-array fields are ignored.
fn collect_strings(field: &'static str, value: Option<&Value>, skipped: &mut Vec<SkippedEntry>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item {
            Value::String(s) => out.push(s.clone()),
            other => skipped.push(SkippedEntry {
                field,
                index,
                reason: format!("expected string, got {}", json_type(other)),
            }),
        }
    }
    out
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheOptions, TaggedCache};
    use crate::storefront::pages::{fixtures::page, PageCache};
    use serde_json::json;

    async fn seeded() -> (RevalidationGateway, Arc<ContentCache>, Arc<PageCache>) {
        let content: Arc<ContentCache> = Arc::new(TaggedCache::new("content"));
        let pages = Arc::new(PageCache::new());

        for (key, tags) in [("cms:header", ["cms", "header"]), ("cms:footer", ["cms", "footer"])] {
            content
                .get_or_compute(key, CacheOptions::tagged(tags), || async {
                    Ok::<_, std::convert::Infallible>(Arc::new(json!({ "doc": key })))
                })
                .await
                .unwrap();
        }
        pages.store(&pages.ticket(), &["/product/shoes"], Arc::new(page("shoes")));

        let gateway = RevalidationGateway::new("s3cret", content.clone(), pages.clone());
        (gateway, content, pages)
    }

    fn request(value: Value) -> RevalidateRequest {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_wrong_secret_has_no_side_effects() {
        let (gateway, content, pages) = seeded().await;

        let err = gateway
            .revalidate(&request(json!({ "tags": ["cms"], "paths": ["/product/shoes"], "secret": "nope" })))
            .unwrap_err();

        assert_eq!(err, RevalidationError::Unauthorized);
        assert_eq!(content.len(), 2);
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_or_non_string_secret_rejected() {
        let (gateway, content, _) = seeded().await;

        assert!(gateway.revalidate(&request(json!({ "tags": ["cms"] }))).is_err());
        assert!(gateway.revalidate(&request(json!({ "tags": ["cms"], "secret": 42 }))).is_err());
        assert!(gateway.revalidate(&request(json!({ "tags": ["cms"], "secret": "s3cre" }))).is_err());
        assert_eq!(content.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_applies_tags_and_paths() {
        let (gateway, content, pages) = seeded().await;

        let outcome = gateway
            .revalidate(&request(json!({
                "tags": ["header"],
                "paths": ["/product/shoes", "/product/unknown"],
                "secret": "s3cret"
            })))
            .unwrap();

        assert_eq!(outcome.revalidated_tags, vec!["header"]);
        assert_eq!(outcome.revalidated_paths, vec!["/product/shoes", "/product/unknown"]);
        assert!(outcome.skipped.is_empty());
        assert!(content.get("cms:header").is_none());
        assert!(content.get("cms:footer").is_some());
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped_and_reported() {
        let (gateway, content, _) = seeded().await;

        let outcome = gateway
            .revalidate(&request(json!({
                "tags": [1, "footer", null],
                "paths": "not-an-array",
                "secret": "s3cret"
            })))
            .unwrap();

        assert_eq!(outcome.revalidated_tags, vec!["footer"]);
        assert!(outcome.revalidated_paths.is_empty());
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].index, 0);
        assert_eq!(outcome.skipped[0].reason, "expected string, got number");
        assert_eq!(outcome.skipped[1].index, 2);
        assert_eq!(content.keys_for_tag("cms").len(), 1);
    }

    #[tokio::test]
    async fn test_single_target() {
        let (gateway, content, pages) = seeded().await;

        assert_eq!(
            gateway.revalidate_one(Some("s3cret"), None, None).unwrap_err(),
            RevalidationError::MissingTarget
        );
        assert_eq!(
            gateway.revalidate_one(None, Some("cms"), None).unwrap_err(),
            RevalidationError::Unauthorized
        );

        // Tag wins; the path is ignored.
        let outcome = gateway.revalidate_one(Some("s3cret"), Some("promo"), Some("/product/shoes")).unwrap();
        assert_eq!(outcome.revalidated_tags, vec!["promo"]);
        assert!(outcome.revalidated_paths.is_empty());
        assert_eq!(content.len(), 2);
        assert_eq!(pages.len(), 1);

        let outcome = gateway.revalidate_one(Some("s3cret"), None, Some("/product/shoes")).unwrap();
        assert_eq!(outcome.revalidated_paths, vec!["/product/shoes"]);
        assert!(pages.is_empty());
    }

    #[tokio::test]
    async fn test_empty_single_target_is_missing() {
        let (gateway, content, _) = seeded().await;

        assert_eq!(
            gateway.revalidate_one(Some("s3cret"), Some(""), Some("")).unwrap_err(),
            RevalidationError::MissingTarget
        );
        assert_eq!(content.len(), 2);

        // An empty tag falls through to the path.
        let outcome = gateway.revalidate_one(Some("s3cret"), Some(""), Some("/product/shoes")).unwrap();
        assert!(outcome.revalidated_tags.is_empty());
        assert_eq!(outcome.revalidated_paths, vec!["/product/shoes"]);
    }

    #[tokio::test]
    async fn test_content_tag_drops_pages_built_from_it() {
        let (gateway, content, pages) = seeded().await;

        gateway.revalidate_one(Some("s3cret"), Some("footer"), None).unwrap();

        assert!(content.get("cms:footer").is_none());
        assert!(content.get("cms:header").is_some());
        assert!(pages.is_empty());
    }
}

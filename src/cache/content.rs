//! CMS documents served through the tagged cache.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::entry::CacheOptions;
use crate::cache::tagged::{CacheError, TaggedCache};
use crate::config::ContentConfig;
use crate::http::upstream::UpstreamClient;

/// Tag shared by every CMS document.
pub const CMS_TAG: &str = "cms";

/// The CMS documents the storefront renders around product pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Header,
    Footer,
    SiteConfig,
}

impl ContentKind {
    /// Path on the data server.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ContentKind::Header => "/header",
            ContentKind::Footer => "/footer",
            ContentKind::SiteConfig => "/global",
        }
    }

    /// Tag upstream editors revalidate when this document changes.
    pub fn tag(&self) -> &'static str {
        match self {
            ContentKind::Header => "header",
            ContentKind::Footer => "footer",
            ContentKind::SiteConfig => "global",
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}", CMS_TAG, self.tag())
    }
}

/// Shared handle to the content cache.
pub type ContentCache = TaggedCache<Arc<Value>>;

/// Fetches CMS documents on miss and keeps them until invalidated.
#[derive(Clone)]
pub struct ContentService {
    cache: Arc<ContentCache>,
    client: UpstreamClient,
    base_url: String,
    fetch_timeout: Duration,
    ttl: Option<Duration>,
}

impl ContentService {
    pub fn new(cache: Arc<ContentCache>, client: UpstreamClient, config: &ContentConfig) -> Self {
        Self {
            cache,
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            ttl: config.ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Cached document, fetched from the data server on miss.
    ///
    /// There is no safe default for content, so upstream failures are returned
    /// to the caller.
    pub async fn document(&self, kind: ContentKind) -> Result<Arc<Value>, CacheError> {
        let url = format!("{}{}", self.base_url, kind.endpoint());
        let options = CacheOptions::tagged([CMS_TAG, kind.tag()]).with_ttl(self.ttl);

        self.cache
            .get_or_compute(&kind.cache_key(), options, || async {
                self.client
                    .get_json_within::<Value>(&url, self.fetch_timeout)
                    .await
                    .map(Arc::new)
            })
            .await
    }

    pub async fn header(&self) -> Result<Arc<Value>, CacheError> {
        self.document(ContentKind::Header).await
    }

    pub async fn footer(&self) -> Result<Arc<Value>, CacheError> {
        self.document(ContentKind::Footer).await
    }

    pub async fn site_config(&self) -> Result<Arc<Value>, CacheError> {
        self.document(ContentKind::SiteConfig).await
    }
}

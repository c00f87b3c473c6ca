//! Product page render model and the path-keyed page cache.

use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::cache::{CacheOptions, CacheStats, ContentKind, TaggedCache, Ticket, CMS_TAG};
use crate::experiments::{Variant, VariantConfig};
use crate::revalidation::PathRevalidator;

/// Everything a template needs to render a product page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub slug: String,
    /// Template tree the page was served from.
    pub template: &'static str,
    pub layout_variant: Variant,
    pub button_variant: Variant,
    pub button: VariantConfig,
    pub layout: VariantConfig,
    pub header: Option<Arc<Value>>,
    pub footer: Option<Arc<Value>>,
    pub site_config: Option<Arc<Value>>,
}

impl ProductPage {
    /// All CMS documents were available when the page was built.
    pub fn is_complete(&self) -> bool {
        self.header.is_some() && self.footer.is_some() && self.site_config.is_some()
    }
}

/// Which rendering of a path a page is: the variants it shows and the
/// registry configs behind them.
///
/// The configs are folded into a fingerprint so a registry change to a
/// variant's button or layout settings misses the cache instead of serving the
/// page built from the previous definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageVariant {
    pub button: Variant,
    pub layout: Variant,
    configs: u64,
}

impl PageVariant {
    pub fn new(button: Variant, layout: Variant, button_config: &VariantConfig, layout_config: &VariantConfig) -> Self {
        let mut hasher = DefaultHasher::new();
        button_config.hash(&mut hasher);
        layout_config.hash(&mut hasher);
        Self {
            button,
            layout,
            configs: hasher.finish(),
        }
    }

    pub fn of(page: &ProductPage) -> Self {
        Self::new(page.button_variant, page.layout_variant, &page.button, &page.layout)
    }
}

/// Taken before a page's inputs are read; see [`PageCache::store`].
pub type PageTicket<'a> = Ticket<'a, Arc<ProductPage>>;

/// Rendered pages, one per (path, [`PageVariant`]).
///
/// Each page is tagged with every path it answers for and with the CMS tags of
/// the documents it embeds, so both path and tag revalidation reach it.
pub struct PageCache {
    inner: TaggedCache<Arc<ProductPage>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self {
            inner: TaggedCache::new("pages"),
        }
    }

    fn path_tag(path: &str) -> String {
        format!("path:{}", path)
    }

    fn key(path: &str, variant: &PageVariant) -> String {
        format!("{}#{}{}#{:016x}", path, variant.button, variant.layout, variant.configs)
    }

    pub fn get(&self, path: &str, variant: &PageVariant) -> Option<Arc<ProductPage>> {
        self.inner.get(&Self::key(path, variant))
    }

    pub fn ticket(&self) -> PageTicket<'_> {
        self.inner.ticket()
    }

    /// Store under the first of `paths`, reachable from all of them.
    ///
    /// Skipped when any of those paths or embedded documents was revalidated
    /// after `ticket` was taken. Returns whether the page was stored.
    pub fn store(&self, ticket: &PageTicket<'_>, paths: &[&str], page: Arc<ProductPage>) -> bool {
        let Some(primary) = paths.first() else {
            return false;
        };

        let content_tags = [ContentKind::Header, ContentKind::Footer, ContentKind::SiteConfig]
            .map(|kind| kind.tag().to_string());
        let tags = paths
            .iter()
            .map(|path| Self::path_tag(path))
            .chain(content_tags)
            .chain(std::iter::once(CMS_TAG.to_string()));

        let key = Self::key(primary, &PageVariant::of(&page));
        self.inner
            .insert_if_current(ticket, &key, page, &CacheOptions::tagged(tags))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PathRevalidator for PageCache {
    fn revalidate_path(&self, path: &str) -> bool {
        self.inner.invalidate_by_tag(&Self::path_tag(path)) > 0
    }

    fn revalidate_tag(&self, tag: &str) -> usize {
        self.inner.invalidate_by_tag(tag)
    }
}

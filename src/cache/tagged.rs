//! Tag-indexed get-or-compute cache.
//!
//! # Responsibilities
//! - Serve non-expired values by key
//! - Run at most one compute per missing key at a time (single-flight)
//! - Invalidate by key or by tag, keeping the tag index exact
//!
//! # Design Decisions
//! - Entries and tag index live in one struct behind one lock, so readers
//!   never observe one updated without the other
//! - The lock is never held across an await; computes run unlocked
//! - In-flight computes are coordinated per key in a DashMap, so unrelated
//!   keys never wait on each other
//! - TTL is checked lazily on read; there is no sweeper
//! - Work that overlaps an invalidation of its own key or tags still answers
//!   its callers but is not stored. Invalidations elsewhere do not affect it
//! - Callers that build values outside `get_or_compute` take a [`Ticket`]
//!   before reading their inputs and store through `insert_if_current`

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::cache::entry::{CacheEntry, CacheOptions};
use crate::observability::metrics;

/// Failure shared by every caller of one flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("computing '{key}' failed: {message}")]
    Compute { key: String, message: String },
}

/// Point-in-time counters for one cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub invalidated: u64,
    pub entries: usize,
    pub tags: usize,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tags: HashMap<String, HashSet<String>>,
    /// Bumped by every invalidation.
    epoch: u64,
    /// Epoch of the latest invalidation per tag and per key, kept only while
    /// some open ticket predates it.
    tag_marks: HashMap<String, u64>,
    key_marks: HashMap<String, u64>,
    cleared_at: u64,
    /// Start epoch of every open ticket, with counts.
    open: BTreeMap<u64, usize>,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tags: HashMap::new(),
            epoch: 0,
            tag_marks: HashMap::new(),
            key_marks: HashMap::new(),
            cleared_at: 0,
            open: BTreeMap::new(),
        }
    }

    fn bump(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn open_ticket(&mut self) -> u64 {
        *self.open.entry(self.epoch).or_insert(0) += 1;
        self.epoch
    }

    fn close_ticket(&mut self, started: u64) {
        if let Some(count) = self.open.get_mut(&started) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&started);
            }
        }
        self.prune_marks();
    }

    /// Marks no newer than the oldest open ticket can no longer reject anything.
    fn prune_marks(&mut self) {
        match self.open.keys().next().copied() {
            Some(oldest) => {
                self.tag_marks.retain(|_, mark| *mark > oldest);
                self.key_marks.retain(|_, mark| *mark > oldest);
            }
            None => {
                self.tag_marks.clear();
                self.key_marks.clear();
            }
        }
    }

    /// Nothing touching `key` or `tags` was invalidated after `started`.
    fn is_current(&self, started: u64, key: &str, tags: &BTreeSet<String>) -> bool {
        let newer = |mark: Option<&u64>| mark.is_some_and(|mark| *mark > started);
        self.cleared_at <= started
            && !newer(self.key_marks.get(key))
            && !tags.iter().any(|tag| newer(self.tag_marks.get(tag)))
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        self.remove(&entry.key);
        for tag in &entry.tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove an entry and every tag-bucket membership it has.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(bucket) = self.tags.get_mut(tag) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn remove_tag(&mut self, tag: &str) -> usize {
        let Some(keys) = self.tags.remove(tag) else {
            return 0;
        };
        keys.iter().filter(|key| self.remove(key).is_some()).count()
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    invalidated: AtomicU64,
}

type Flight<V> = Arc<OnceCell<Result<V, CacheError>>>;

/// Work in progress whose result may be stored later.
///
/// Taken before the inputs are read. An invalidation of the result's key or of
/// any of its tags after that point makes the result unstorable. Dropping the
/// ticket, including by cancellation, releases it.
pub struct Ticket<'a, V> {
    cache: &'a TaggedCache<V>,
    started: u64,
}

impl<V> Drop for Ticket<'_, V> {
    fn drop(&mut self) {
        self.cache.state.write().close_ticket(self.started);
    }
}

/// In-memory store keyed by string with tag-based invalidation.
pub struct TaggedCache<V> {
    name: &'static str,
    state: RwLock<CacheState<V>>,
    inflight: DashMap<String, Flight<V>>,
    counters: Counters,
}

impl<V> TaggedCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// `name` labels this cache's metrics.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(CacheState::new()),
            inflight: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Non-expired value for `key`. Expired entries are dropped here.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let state = self.state.read();
            match state.entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut state = self.state.write();
        // Re-check: a writer may have replaced the entry in between.
        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => return None,
        };
        if !expired {
            return state.entries.get(key).map(|entry| entry.value.clone());
        }

        state.remove(key);
        tracing::debug!(cache = self.name, key = %key, "Expired entry dropped");
        metrics::record_cache_entries(self.name, state.entries.len());
        None
    }

    /// Cached value, or the result of `compute` shared by all concurrent callers.
    ///
    /// `compute` runs at most once per key while a miss is in progress. Errors are
    /// returned to every waiter and not cached.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &str,
        options: CacheOptions,
        compute: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        if let Some(value) = self.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_request(self.name, "hit");
            return Ok(value);
        }

        let flight: Flight<V> = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let leader_flight = flight.clone();
        let result = flight
            .get_or_init(|| async move {
                let result = self.lead(key, &options, compute).await;
                // Retire the flight before publishing so late arrivals consult
                // the store instead of an already-decided result.
                self.inflight
                    .remove_if(key, |_, current| Arc::ptr_eq(current, &leader_flight));
                result
            })
            .await;

        result.clone()
    }

    async fn lead<F, Fut, E>(&self, key: &str, options: &CacheOptions, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Display,
    {
        // A previous flight may have filled the slot since our first look.
        if let Some(value) = self.get(key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_request(self.name, "hit");
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_request(self.name, "miss");

        let ticket = self.ticket();

        match compute().await {
            Ok(value) => {
                self.insert_if_current(&ticket, key, value.clone(), options);
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(cache = self.name, key = %key, error = %e, "Cache compute failed");
                Err(CacheError::Compute {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Store `value` directly, replacing any previous entry for `key`.
    pub fn insert(&self, key: &str, value: V, options: &CacheOptions) {
        let mut state = self.state.write();
        state.insert(CacheEntry::new(key, value, options));
        metrics::record_cache_entries(self.name, state.entries.len());
    }

    /// Start work whose result will go through [`insert_if_current`](Self::insert_if_current).
    pub fn ticket(&self) -> Ticket<'_, V> {
        let started = self.state.write().open_ticket();
        Ticket { cache: self, started }
    }

    /// Store `value` unless its key or one of its tags was invalidated since
    /// `ticket` was taken. Returns whether it was stored.
    pub fn insert_if_current(&self, ticket: &Ticket<'_, V>, key: &str, value: V, options: &CacheOptions) -> bool {
        debug_assert!(std::ptr::eq(ticket.cache, self));
        let entry = CacheEntry::new(key, value, options);

        let mut state = self.state.write();
        if !state.is_current(ticket.started, key, &entry.tags) {
            tracing::debug!(cache = self.name, key = %key, "Invalidated while building, result not stored");
            return false;
        }
        state.insert(entry);
        metrics::record_cache_entries(self.name, state.entries.len());
        true
    }

    /// Remove every entry carrying `tag`. Returns how many were removed.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut state = self.state.write();
        let mark = state.bump();
        state.tag_marks.insert(tag.to_string(), mark);
        state.prune_marks();
        let removed = state.remove_tag(tag);
        metrics::record_cache_entries(self.name, state.entries.len());
        drop(state);

        self.counters.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        metrics::record_cache_invalidation(self.name, "tag");
        tracing::info!(cache = self.name, tag = %tag, removed, "Invalidated by tag");
        removed
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate_by_key(&self, key: &str) -> bool {
        let mut state = self.state.write();
        let mark = state.bump();
        state.key_marks.insert(key.to_string(), mark);
        state.prune_marks();
        let removed = state.remove(key).is_some();
        metrics::record_cache_entries(self.name, state.entries.len());
        drop(state);

        if removed {
            self.counters.invalidated.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_cache_invalidation(self.name, "key");
        tracing::info!(cache = self.name, key = %key, removed, "Invalidated by key");
        removed
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        let mut state = self.state.write();
        state.cleared_at = state.bump();
        state.prune_marks();
        let removed = state.entries.len();
        state.entries.clear();
        state.tags.clear();
        drop(state);

        self.counters.invalidated.fetch_add(removed as u64, Ordering::Relaxed);
        metrics::record_cache_entries(self.name, 0);
        removed
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tags of a stored entry, expired or not.
    pub fn tags_for(&self, key: &str) -> Option<BTreeSet<String>> {
        self.state.read().entries.get(key).map(|e| e.tags.clone())
    }

    /// Keys currently indexed under `tag`.
    pub fn keys_for_tag(&self, tag: &str) -> BTreeSet<String> {
        self.state
            .read()
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computes: self.counters.computes.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            entries: state.entries.len(),
            tags: state.tags.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::{Barrier, Notify};

    type Infallible = std::convert::Infallible;

    fn cache() -> Arc<TaggedCache<String>> {
        Arc::new(TaggedCache::new("test"))
    }

    async fn fill(cache: &TaggedCache<String>, key: &str, tags: &[&str]) {
        cache
            .get_or_compute(key, CacheOptions::tagged(tags.iter().copied()), || async {
                Ok::<_, Infallible>(format!("value-of-{}", key))
            })
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(50));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                cache
                    .get_or_compute("k", CacheOptions::tagged(["cms"]), || async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, Infallible>(format!("computed-{}", n))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == "computed-0"));
        assert_eq!(cache.stats().computes, 1);
    }

    #[tokio::test]
    async fn test_hit_skips_compute() {
        let cache = cache();
        fill(&cache, "k", &["cms"]).await;

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_compute("k", CacheOptions::default(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("recomputed".to_string())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(value, "value-of-k");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_tag_invalidation_makes_next_read_miss() {
        let cache = cache();
        fill(&cache, "header-doc", &["cms", "header"]).await;

        assert_eq!(cache.invalidate_by_tag("header"), 1);

        let calls = AtomicUsize::new(0);
        cache
            .get_or_compute("header-doc", CacheOptions::tagged(["cms", "header"]), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>("fresh".to_string())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multi_tag_cleanup() {
        let cache = cache();
        fill(&cache, "header-doc", &["cms", "header"]).await;
        fill(&cache, "footer-doc", &["cms", "footer"]).await;

        assert_eq!(cache.invalidate_by_tag("header"), 1);
        assert_eq!(cache.keys_for_tag("cms"), BTreeSet::from(["footer-doc".to_string()]));
        assert!(cache.keys_for_tag("header").is_empty());

        assert_eq!(cache.invalidate_by_tag("cms"), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().tags, 0);
        assert_eq!(cache.invalidate_by_tag("cms"), 0);
    }

    #[tokio::test]
    async fn test_invalidate_by_key_unindexes() {
        let cache = cache();
        fill(&cache, "a", &["cms", "header"]).await;
        fill(&cache, "b", &["cms"]).await;

        assert!(cache.invalidate_by_key("a"));
        assert!(!cache.invalidate_by_key("a"));
        assert!(cache.keys_for_tag("header").is_empty());
        assert_eq!(cache.keys_for_tag("cms").len(), 1);
        assert_eq!(cache.get("b").as_deref(), Some("value-of-b"));
    }

    #[test]
    fn test_insert_replaces_tags() {
        let cache = TaggedCache::<String>::new("test");
        cache.insert("page", "v1".to_string(), &CacheOptions::tagged(["path:/a", "cms"]));
        cache.insert("page", "v2".to_string(), &CacheOptions::tagged(["path:/b"]));

        assert_eq!(cache.get("page").as_deref(), Some("v2"));
        assert!(cache.keys_for_tag("path:/a").is_empty());
        assert!(cache.keys_for_tag("cms").is_empty());
        assert_eq!(cache.invalidate_by_tag("path:/b"), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let cache = cache();
        cache
            .get_or_compute(
                "short",
                CacheOptions::tagged(["cms"]).with_ttl(Some(Duration::from_millis(20))),
                || async { Ok::<_, Infallible>("v".to_string()) },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        // Still indexed until someone reads it.
        assert_eq!(cache.keys_for_tag("cms").len(), 1);

        assert!(cache.get("short").is_none());
        assert!(cache.keys_for_tag("cms").is_empty());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_errors_shared_and_not_cached() {
        let cache = cache();
        let err = cache
            .get_or_compute("k", CacheOptions::default(), || async { Err::<String, _>("upstream down") })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CacheError::Compute {
                key: "k".to_string(),
                message: "upstream down".to_string()
            }
        );
        assert!(cache.is_empty());

        fill(&cache, "k", &[]).await;
        assert_eq!(cache.get("k").as_deref(), Some("value-of-k"));
    }

    #[tokio::test]
    async fn test_invalidation_during_compute_is_not_stored() {
        let cache = cache();
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let pending = {
            let cache = cache.clone();
            let started = started.clone();
            let release = release.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", CacheOptions::tagged(["cms"]), || async move {
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, Infallible>("stale".to_string())
                    })
                    .await
            })
        };

        started.notified().await;
        cache.invalidate_by_tag("cms");
        release.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), "stale");
        assert!(cache.get("k").is_none());
    }

    #[tokio::test]
    async fn test_unrelated_invalidation_during_compute_still_stores() {
        let cache = cache();
        fill(&cache, "footer-doc", &["cms", "footer"]).await;
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let pending = {
            let cache = cache.clone();
            let started = started.clone();
            let release = release.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("header-doc", CacheOptions::tagged(["cms", "header"]), || async move {
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, Infallible>("fresh".to_string())
                    })
                    .await
            })
        };

        started.notified().await;
        assert_eq!(cache.invalidate_by_tag("footer"), 1);
        assert!(!cache.invalidate_by_key("unrelated"));
        release.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), "fresh");
        assert_eq!(cache.get("header-doc").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_ticket_rejects_work_overlapping_its_tags() {
        let cache = TaggedCache::<String>::new("test");
        let options = CacheOptions::tagged(["path:/a", "header"]);

        let ticket = cache.ticket();
        cache.invalidate_by_tag("header");
        assert!(!cache.insert_if_current(&ticket, "page", "stale".to_string(), &options));
        drop(ticket);

        let ticket = cache.ticket();
        cache.invalidate_by_tag("footer");
        assert!(cache.insert_if_current(&ticket, "page", "fresh".to_string(), &options));
        assert_eq!(cache.get("page").as_deref(), Some("fresh"));

        cache.clear();
        assert!(!cache.insert_if_current(&ticket, "page", "late".to_string(), &options));
    }

    #[test]
    fn test_marks_released_with_last_ticket() {
        let cache = TaggedCache::<String>::new("test");
        let first = cache.ticket();
        cache.invalidate_by_tag("header");
        let second = cache.ticket();
        cache.invalidate_by_key("page");

        drop(first);
        {
            let state = cache.state.read();
            assert!(state.tag_marks.is_empty());
            assert_eq!(state.key_marks.len(), 1);
        }

        drop(second);
        let state = cache.state.read();
        assert!(state.key_marks.is_empty());
        assert!(state.open.is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_keys_do_not_serialize() {
        let cache = cache();
        let release = Arc::new(Notify::new());

        let slow = {
            let cache = cache.clone();
            let release = release.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", CacheOptions::default(), || async move {
                        release.notified().await;
                        Ok::<_, Infallible>("slow".to_string())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = tokio::time::timeout(Duration::from_secs(1), fill(&cache, "fast", &[])).await;
        assert!(fast.is_ok(), "unrelated key blocked behind an in-flight compute");

        release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), "slow");
    }
}

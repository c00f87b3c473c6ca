//! Experiment registry.
//!
//! Holds the latest [`ExperimentSet`] fetched from the data server and hands out
//! immutable snapshots. A snapshot younger than `max_age` is served without a
//! network call; otherwise the next caller refetches it. A failed fetch clears
//! the snapshot so callers fail open instead of serving a definition the
//! upstream can no longer vouch for.

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

use crate::config::RegistryConfig;
use crate::experiments::types::ExperimentSet;
use crate::http::upstream::{UpstreamClient, UpstreamError};
use crate::observability::metrics;

/// Where experiment definitions come from.
pub trait ExperimentSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<ExperimentSet, UpstreamError>>;
}

/// Fetches `{ experiments: {...} }` from the data server over HTTP.
pub struct HttpExperimentSource {
    client: UpstreamClient,
    url: String,
}

impl HttpExperimentSource {
    pub fn new(client: UpstreamClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ExperimentSource for HttpExperimentSource {
    fn fetch(&self) -> BoxFuture<'_, Result<ExperimentSet, UpstreamError>> {
        Box::pin(self.client.get_json::<ExperimentSet>(&self.url))
    }
}

/// Fixed in-memory definitions.
pub struct StaticExperimentSource(pub ExperimentSet);

impl ExperimentSource for StaticExperimentSource {
    fn fetch(&self) -> BoxFuture<'_, Result<ExperimentSet, UpstreamError>> {
        let set = self.0.clone();
        Box::pin(async move { Ok(set) })
    }
}

struct Snapshot {
    set: Arc<ExperimentSet>,
    fetched_at: Instant,
}

/// Read-only lookup of experiment definitions.
pub struct ExperimentRegistry {
    source: Arc<dyn ExperimentSource>,
    current: ArcSwapOption<Snapshot>,
    max_age: Duration,
    fetch_timeout: Duration,
    refresh_lock: Mutex<()>,
}

impl ExperimentRegistry {
    pub fn new(source: Arc<dyn ExperimentSource>, max_age: Duration, fetch_timeout: Duration) -> Self {
        Self {
            source,
            current: ArcSwapOption::empty(),
            max_age,
            fetch_timeout,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Build an HTTP-backed registry from configuration.
    pub fn from_config(config: &RegistryConfig, client: UpstreamClient) -> Self {
        Self::new(
            Arc::new(HttpExperimentSource::new(client, config.url.clone())),
            Duration::from_secs(config.max_age_secs),
            Duration::from_millis(config.fetch_timeout_ms),
        )
    }

    /// Current snapshot, fetching if the cached one is missing or stale.
    pub async fn current(&self) -> Result<Arc<ExperimentSet>, UpstreamError> {
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        if self.max_age.is_zero() {
            return self.refresh().await;
        }

        // Collapse concurrent refetches of a stale snapshot into one.
        let _guard = self.refresh_lock.lock().await;
        if let Some(set) = self.fresh() {
            return Ok(set);
        }
        self.refresh().await
    }

    /// Fetch unconditionally and publish the result.
    pub async fn refresh(&self) -> Result<Arc<ExperimentSet>, UpstreamError> {
        let result = match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(self.fetch_timeout.as_millis() as u64)),
        };

        match result {
            Ok(set) => {
                let set = Arc::new(set);
                tracing::debug!(experiments = set.len(), "Experiment registry refreshed");
                self.current.store(Some(Arc::new(Snapshot {
                    set: set.clone(),
                    fetched_at: Instant::now(),
                })));
                Ok(set)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Experiment registry fetch failed");
                metrics::record_registry_failure();
                self.current.store(None);
                Err(e)
            }
        }
    }

    /// Last published snapshot regardless of age.
    pub fn snapshot(&self) -> Option<Arc<ExperimentSet>> {
        self.current.load_full().map(|s| s.set.clone())
    }

    /// Age of the published snapshot.
    pub fn age(&self) -> Option<Duration> {
        self.current.load_full().map(|s| s.fetched_at.elapsed())
    }

    fn fresh(&self) -> Option<Arc<ExperimentSet>> {
        let guard = self.current.load();
        let snapshot = (*guard).as_ref()?;
        if snapshot.fetched_at.elapsed() < self.max_age {
            Some(snapshot.set.clone())
        } else {
            None
        }
    }

    /// Periodically refresh until shutdown.
    pub async fn run_refresher(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Registry refresher starting");
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.refresh().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Registry refresher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::types::fixtures::{experiment, set};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingSource {
        fn new(fail: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
                delay,
            })
        }
    }

    impl ExperimentSource for CountingSource {
        fn fetch(&self) -> BoxFuture<'_, Result<ExperimentSet, UpstreamError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail {
                    Err(UpstreamError::Status(500))
                } else {
                    Ok(set(vec![experiment("btn", 50.0, "ab_btn")]))
                }
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_snapshot_served_without_refetch() {
        let source = CountingSource::new(false, Duration::ZERO);
        let registry = ExperimentRegistry::new(source.clone(), Duration::from_secs(60), Duration::from_secs(1));

        let first = registry.current().await.unwrap();
        let second = registry.current().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_max_age_fetches_every_time() {
        let source = CountingSource::new(false, Duration::ZERO);
        let registry = ExperimentRegistry::new(source.clone(), Duration::ZERO, Duration::from_secs(1));

        registry.current().await.unwrap();
        registry.current().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_clears_snapshot() {
        let registry = ExperimentRegistry::new(
            CountingSource::new(true, Duration::ZERO),
            Duration::from_secs(60),
            Duration::from_secs(1),
        );

        assert_eq!(registry.current().await.unwrap_err(), UpstreamError::Status(500));
        assert!(registry.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let registry = ExperimentRegistry::new(
            CountingSource::new(false, Duration::from_millis(500)),
            Duration::from_secs(60),
            Duration::from_millis(20),
        );

        assert_eq!(registry.current().await.unwrap_err(), UpstreamError::Timeout(20));
    }

    #[tokio::test]
    async fn test_concurrent_stale_reads_share_one_fetch() {
        let source = CountingSource::new(false, Duration::from_millis(50));
        let registry = Arc::new(ExperimentRegistry::new(
            source.clone(),
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.current().await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}

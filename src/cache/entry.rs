//! Cache entry and per-call storage options.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// How a computed value should be stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Labels enabling bulk invalidation.
    pub tags: Vec<String>,
    /// Lifetime after which the entry is treated as absent.
    pub ttl: Option<Duration>,
}

impl CacheOptions {
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A stored value with its tags and age.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub tags: BTreeSet<String>,
    pub created_at: Instant,
    pub ttl: Option<Duration>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, options: &CacheOptions) -> Self {
        Self {
            key: key.into(),
            value,
            tags: options.tags.iter().cloned().collect(),
            created_at: Instant::now(),
            ttl: options.ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) >= ttl,
            None => false,
        }
    }
}

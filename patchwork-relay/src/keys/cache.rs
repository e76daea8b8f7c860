//! Process-wide cache of externally resolved key sets.

use patchwork_types::TrustedKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What a cache entry is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Provider account handle (stored lowercase; handles are case-insensitive).
    Username(String),
    /// Provider document id.
    Gist(String),
}

impl CacheKey {
    /// Key for a username reference.
    pub fn username(username: &str) -> Self {
        Self::Username(username.to_ascii_lowercase())
    }

    /// Key for a gist reference.
    pub fn gist(gist_id: &str) -> Self {
        Self::Gist(gist_id.to_string())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Username(u) => write!(f, "username:{u}"),
            Self::Gist(g) => write!(f, "gist:{g}"),
        }
    }
}

/// Cached key set with the time its fetch started.
#[derive(Debug, Clone)]
struct KeyCacheEntry {
    keys: Arc<Vec<TrustedKey>>,
    fetched_at: Instant,
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Within TTL; use as is.
    Fresh(Arc<Vec<TrustedKey>>),
    /// Past TTL; refresh, but fall back to this if the refresh fails.
    Stale(Arc<Vec<TrustedKey>>),
    /// Never successfully populated.
    Missing,
}

/// TTL-bounded cache of resolved key sets.
#[derive(Debug)]
pub struct KeyCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<CacheKey, KeyCacheEntry>>,
}

impl KeyCache {
    /// Create a cache whose entries stay fresh for `ttl`.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up `key`, classifying the entry by age.
    pub async fn lookup(&self, key: &CacheKey) -> Lookup {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                Lookup::Fresh(entry.keys.clone())
            }
            Some(entry) => Lookup::Stale(entry.keys.clone()),
            None => Lookup::Missing,
        }
    }

    /// Store a fetch result.
    ///
    /// `fetched_at` is when that fetch started. A result older than the entry
    /// already present is discarded, so a slow response cannot overwrite a
    /// fresher one.
    pub async fn store(&self, key: CacheKey, keys: Arc<Vec<TrustedKey>>, fetched_at: Instant) {
        let mut entries = self.entries.write().await;

        match entries.get(&key).map(|e| e.fetched_at) {
            Some(existing) if existing > fetched_at => {
                tracing::debug!(key = %key, "Discarding out-of-date fetch result");
                return;
            }
            None if entries.len() >= self.max_entries => {
                let ttl = self.ttl;
                entries.retain(|_, e| e.fetched_at.elapsed() < ttl);

                // Still full: drop an arbitrary half.
                if entries.len() >= self.max_entries {
                    let to_remove: Vec<_> = entries
                        .keys()
                        .take(entries.len() / 2 + 1)
                        .cloned()
                        .collect();
                    for k in to_remove {
                        entries.remove(&k);
                    }
                }
            }
            _ => {}
        }

        entries.insert(key, KeyCacheEntry { keys, fetched_at });
    }

    /// Remove entries older than `max_age`. Returns the number removed.
    pub async fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.fetched_at.elapsed() < max_age);
        before - entries.len()
    }

    /// Number of cached references.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when nothing is cached.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

//! Identity resolution: scope → trusted key set.
//!
//! Public and raw-key scopes are resolved locally. Username and gist scopes go
//! through the [`KeyCache`] and, on a miss or expiry, the [`KeyProvider`].
//! A provider failure with no cached value is `ResolveError::Unavailable`,
//! never an empty key set.

mod cache;
mod provider;

pub use cache::{CacheKey, KeyCache, Lookup};
pub use provider::{GitHubProvider, KeyProvider};

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ResolveError};
use patchwork_types::{Scope, TrustedKey, TrustedKeySet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Resolution counters, exported on `/metrics`.
#[derive(Debug, Default)]
pub struct ResolverStats {
    /// Lookups answered from a fresh cache entry.
    pub cache_hits: AtomicU64,
    /// Lookups that went to the provider.
    pub cache_misses: AtomicU64,
    /// Provider failures answered with a stale entry.
    pub stale_served: AtomicU64,
    /// Provider failures with nothing cached.
    pub failures: AtomicU64,
}

/// Turns a channel scope into the set of keys allowed to publish on it.
pub struct IdentityResolver {
    provider: Arc<dyn KeyProvider>,
    cache: KeyCache,
    request_timeout: Duration,
    stats: ResolverStats,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("cache", &self.cache)
            .field("request_timeout", &self.request_timeout)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Create a resolver over `provider` using the cache policy from `config`.
    pub fn new(provider: Arc<dyn KeyProvider>, config: &ProviderConfig) -> Self {
        Self {
            provider,
            cache: KeyCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.max_cache_entries,
            ),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            stats: ResolverStats::default(),
        }
    }

    /// Resolve `scope` to its trusted key set.
    pub async fn resolve(&self, scope: &Scope) -> Result<TrustedKeySet, ResolveError> {
        match scope {
            Scope::Public => Ok(TrustedKeySet::AllowAll),
            Scope::SshKey(reference) => {
                Ok(TrustedKeySet::Keys(vec![TrustedKey::from_ssh_reference(reference)?]))
            }
            Scope::WebCryptoKey(reference) => Ok(TrustedKeySet::Keys(vec![
                TrustedKey::from_webcrypto_reference(reference)?,
            ])),
            Scope::Username(username) => {
                Scope::validate_username(username)?;
                let keys = self.resolve_external(CacheKey::username(username)).await?;
                Ok(TrustedKeySet::Keys(keys.as_ref().clone()))
            }
            Scope::Gist(gist_id) => {
                Scope::validate_gist_id(gist_id)?;
                let keys = self.resolve_external(CacheKey::gist(gist_id)).await?;
                Ok(TrustedKeySet::Keys(keys.as_ref().clone()))
            }
        }
    }

    async fn resolve_external(&self, key: CacheKey) -> Result<Arc<Vec<TrustedKey>>, ResolveError> {
        let fallback = match self.cache.lookup(&key).await {
            Lookup::Fresh(keys) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(reference = %key, keys = keys.len(), "Keys resolved from cache");
                return Ok(keys);
            }
            Lookup::Stale(keys) => Some(keys),
            Lookup::Missing => None,
        };
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let fetched = tokio::time::timeout(self.request_timeout, self.fetch(&key))
            .await
            .unwrap_or(Err(ProviderError::Timeout));

        match (fetched, fallback) {
            (Ok(keys), _) => {
                tracing::debug!(reference = %key, keys = keys.len(), "Keys fetched from provider");
                let keys = Arc::new(keys);
                self.cache.store(key, keys.clone(), started).await;
                Ok(keys)
            }
            (Err(e), Some(stale)) => {
                self.stats.stale_served.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(reference = %key, error = %e, "Provider refresh failed, serving cached keys");
                Ok(stale)
            }
            (Err(e), None) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(reference = %key, error = %e, "Provider lookup failed with nothing cached");
                Err(ResolveError::Unavailable {
                    reference: key.to_string(),
                    source: e,
                })
            }
        }
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Vec<TrustedKey>, ProviderError> {
        match key {
            CacheKey::Username(username) => self.provider.user_keys(username).await,
            CacheKey::Gist(gist_id) => self.provider.gist_keys(gist_id).await,
        }
    }

    /// Access the key cache.
    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    /// Access the resolution counters.
    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }
}

//! Main Relay coordination.
//!
//! `Relay` owns the channel registry, the identity resolver, rate limiters and
//! counters, and runs the publish and subscribe pipelines on their behalf.

use crate::config::Config;
use crate::error::{ProviderError, RelayError, Result};
use crate::keys::{GitHubProvider, IdentityResolver, KeyProvider};
use crate::limits::{RateLimitError, RateLimits};
use crate::registry::{ChannelRegistry, Message, WaitOutcome};
use patchwork_types::{ChannelName, Proof, Scope, TrustedKeySet};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Header carrying the publisher's signature.
pub const SIGNATURE_HEADER: &str = "Patchwork-Signature";

/// Operational metrics for monitoring relay activity.
///
/// Counters are monotonically increasing (reset only on restart), except
/// `tunnels_active` which is a gauge.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Publishes accepted (after authorization).
    pub publishes_total: AtomicU64,
    /// Sum of waiters reached by accepted publishes.
    pub deliveries_total: AtomicU64,
    /// Publish body bytes accepted.
    pub bytes_received: AtomicU64,
    /// Subscribe calls started.
    pub subscribes_total: AtomicU64,
    /// Subscribe calls that hit their deadline.
    pub subscribe_timeouts: AtomicU64,
    /// Subscribe calls released by shutdown.
    pub subscribe_cancellations: AtomicU64,
    /// Publishes rejected for a missing, malformed or non-matching signature.
    pub auth_failures: AtomicU64,
    /// Publishes rejected because key resolution was unavailable.
    pub resolution_failures: AtomicU64,
    /// Rate limit rejections (publish + tunnel + global).
    pub rate_limit_hits: AtomicU64,
    /// Tunnels upgraded and relaying.
    pub tunnels_opened: AtomicU64,
    /// Tunnel requests that failed before the upgrade.
    pub tunnels_failed: AtomicU64,
    /// Tunnels currently relaying.
    pub tunnels_active: AtomicU64,
    /// Bytes relayed from WebSocket clients to TCP targets.
    pub tunnel_bytes_up: AtomicU64,
    /// Bytes relayed from TCP targets to WebSocket clients.
    pub tunnel_bytes_down: AtomicU64,
}

/// Result of an accepted publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    /// Full channel name the message went to.
    pub channel: ChannelName,
    /// Number of subscribers that received it.
    pub delivered: usize,
}

/// Main relay.
pub struct Relay {
    config: Config,
    registry: ChannelRegistry,
    resolver: IdentityResolver,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("channels", &self.registry.channel_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay resolving external identities through `provider`.
    pub fn new(config: Config, provider: Arc<dyn KeyProvider>) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        let resolver = IdentityResolver::new(provider, &config.provider);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            registry: ChannelRegistry::new(),
            resolver,
            rate_limits,
            metrics: RelayMetrics::default(),
            shutdown,
        }
    }

    /// Create a relay backed by the GitHub API configured in `config.provider`.
    pub fn with_github(config: Config) -> std::result::Result<Self, ProviderError> {
        let provider = GitHubProvider::new(&config.provider)?;
        Ok(Self::new(config, Arc::new(provider)))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the channel registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Get access to the identity resolver.
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Release every pending subscriber with `Canceled` and refuse new waits.
    pub fn shutdown(&self) {
        tracing::info!(
            "Shutting down relay ({} waiters pending)",
            self.registry.total_waiters()
        );
        self.shutdown.send_replace(true);
    }

    /// True once [`Relay::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Apply the global quota and, when the client address is known, the
    /// per-client publish quota.
    pub fn check_publish_rate(&self, client: Option<IpAddr>) -> Result<()> {
        self.check_rate(|limits| {
            limits.check_global()?;
            match client {
                Some(ip) => limits.check_publish(ip),
                None => Ok(()),
            }
        })
    }

    /// Apply the global quota and, when the client address is known, the
    /// per-client tunnel quota.
    pub fn check_tunnel_rate(&self, client: Option<IpAddr>) -> Result<()> {
        self.check_rate(|limits| {
            limits.check_global()?;
            match client {
                Some(ip) => limits.check_tunnel(ip),
                None => Ok(()),
            }
        })
    }

    /// Apply the global quota only.
    pub fn check_global_rate(&self) -> Result<()> {
        self.check_rate(RateLimits::check_global)
    }

    fn check_rate(
        &self,
        check: impl FnOnce(&RateLimits) -> std::result::Result<(), RateLimitError>,
    ) -> Result<()> {
        check(&self.rate_limits).map_err(|e| {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            RelayError::RateLimited {
                reason: e.to_string(),
            }
        })
    }

    /// Authorize and deliver a publish on `path` within `scope`.
    ///
    /// `signature` is the raw proof header value, if the client sent one.
    pub async fn publish(
        &self,
        scope: &Scope,
        path: &str,
        message: Message,
        signature: Option<&str>,
    ) -> Result<PublishReceipt> {
        let channel = ChannelName::new(scope, path)?;

        let limit = self.config.server.max_message_bytes;
        if message.body.len() > limit {
            return Err(RelayError::PayloadTooLarge { limit });
        }

        self.authorize(scope, &message.body, signature).await?;

        let body_len = message.body.len() as u64;
        let delivered = self.registry.publish(&channel, message);

        self.metrics.publishes_total.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .deliveries_total
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.metrics
            .bytes_received
            .fetch_add(body_len, Ordering::Relaxed);

        Ok(PublishReceipt { channel, delivered })
    }

    /// Check that `payload` carries a signature from a key trusted by `scope`.
    pub async fn authorize(
        &self,
        scope: &Scope,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<()> {
        let trusted = match self.resolver.resolve(scope).await {
            Ok(trusted) => trusted,
            Err(e) => {
                self.metrics
                    .resolution_failures
                    .fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        self.check_signature(scope, &trusted, payload, signature)
            .inspect_err(|_| {
                self.metrics.auth_failures.fetch_add(1, Ordering::Relaxed);
            })
    }

    fn check_signature(
        &self,
        scope: &Scope,
        trusted: &TrustedKeySet,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<()> {
        let encoding = match scope.proof_encoding() {
            Some(encoding) if !trusted.allows_all() => encoding,
            _ => return Ok(()),
        };

        let raw = signature.ok_or(RelayError::MissingSignature {
            header: SIGNATURE_HEADER,
        })?;
        let proof = Proof::parse(encoding, raw)?;

        match trusted.find_signer(payload, &proof) {
            Some(key) => {
                tracing::debug!(
                    scope = %scope,
                    signer = %key.fingerprint(),
                    "Publish signature verified"
                );
                Ok(())
            }
            None => {
                tracing::info!(
                    scope = %scope,
                    candidates = trusted.len(),
                    "Publish signature matched no trusted key"
                );
                Err(RelayError::SignatureMismatch {
                    scope: scope.to_string(),
                })
            }
        }
    }

    /// Wait up to `timeout` for the next publish on `path` within `scope`.
    pub async fn subscribe(
        &self,
        scope: &Scope,
        path: &str,
        timeout: Duration,
    ) -> Result<WaitOutcome> {
        let channel = ChannelName::new(scope, path)?;
        self.metrics.subscribes_total.fetch_add(1, Ordering::Relaxed);

        let mut shutdown = self.shutdown.subscribe();
        let cancel = async move {
            // A closed sender also counts as shutdown.
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        };

        let outcome = self.registry.subscribe(&channel, timeout, cancel).await;
        match &outcome {
            WaitOutcome::TimedOut => {
                self.metrics
                    .subscribe_timeouts
                    .fetch_add(1, Ordering::Relaxed);
            }
            WaitOutcome::Canceled => {
                self.metrics
                    .subscribe_cancellations
                    .fetch_add(1, Ordering::Relaxed);
            }
            WaitOutcome::Delivered(_) => {}
        }
        Ok(outcome)
    }

    /// Get total subscribers currently waiting.
    pub fn total_waiters(&self) -> usize {
        self.registry.total_waiters()
    }

    /// Get total live channels.
    pub fn total_channels(&self) -> usize {
        self.registry.channel_count()
    }
}

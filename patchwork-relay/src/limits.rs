//! Rate limiting for patchwork-relay.
//!
//! Publishes and tunnel opens are limited per client IP address. A global
//! limiter caps aggregate request throughput across all clients. Subscribes are
//! only subject to the global limit; holding a long-poll open costs nothing but
//! a waiter slot.
//!
//! All limiters come from the governor crate; the keyed ones are backed by
//! DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay.
#[derive(Clone)]
pub struct RateLimits {
    /// Publishes per client IP, configured via `limits.publishes_per_minute`.
    publish_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Tunnel opens per client IP, configured via `limits.tunnels_per_minute`.
    tunnel_limiter: Arc<KeyedLimiter<IpAddr>>,

    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("publish_keys", &self.publish_limiter.len())
            .field("tunnel_keys", &self.tunnel_limiter.len())
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

/// Zero in the config file means "as low as possible", not "disabled".
fn quota_value(configured: u32) -> NonZeroU32 {
    NonZeroU32::new(configured).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    /// Create rate limiters from configuration.
    pub fn new(config: &LimitsConfig) -> Self {
        let publish_quota = Quota::per_minute(quota_value(config.publishes_per_minute));
        let tunnel_quota = Quota::per_minute(quota_value(config.tunnels_per_minute));
        let global_quota = Quota::per_second(quota_value(config.global_requests_per_second));

        Self {
            publish_limiter: Arc::new(RateLimiter::keyed(publish_quota)),
            tunnel_limiter: Arc::new(RateLimiter::keyed(tunnel_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a publish from `client` is allowed.
    pub fn check_publish(&self, client: IpAddr) -> Result<(), RateLimitError> {
        self.publish_limiter
            .check_key(&client)
            .map_err(|_| RateLimitError::PublishLimitExceeded)
    }

    /// Check if a tunnel open from `client` is allowed.
    pub fn check_tunnel(&self, client: IpAddr) -> Result<(), RateLimitError> {
        self.tunnel_limiter
            .check_key(&client)
            .map_err(|_| RateLimitError::TunnelLimitExceeded)
    }

    /// Check the server-wide request rate.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of client addresses tracked by the publish limiter.
    pub fn publish_keys_count(&self) -> usize {
        self.publish_limiter.len()
    }

    /// Number of client addresses tracked by the tunnel limiter.
    pub fn tunnel_keys_count(&self) -> usize {
        self.tunnel_limiter.len()
    }

    /// Drop entries for clients whose quota has fully recharged.
    pub fn shrink(&self) {
        self.publish_limiter.retain_recent();
        self.tunnel_limiter.retain_recent();
        self.publish_limiter.shrink_to_fit();
        self.tunnel_limiter.shrink_to_fit();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many publishes from this client.
    #[error("publish rate limit exceeded")]
    PublishLimitExceeded,
    /// Too many tunnel opens from this client.
    #[error("tunnel rate limit exceeded")]
    TunnelLimitExceeded,
    /// Global request rate exceeded across all clients.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_config() -> LimitsConfig {
        LimitsConfig {
            publishes_per_minute: 5,
            tunnels_per_minute: 2,
            global_requests_per_second: 1000,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn create_rate_limits() {
        let limits = RateLimits::new(&test_config());
        assert_eq!(limits.publish_keys_count(), 0);
        assert_eq!(limits.tunnel_keys_count(), 0);
    }

    #[test]
    fn publish_limit_allows_within_quota() {
        let limits = RateLimits::new(&test_config());

        for _ in 0..5 {
            assert!(limits.check_publish(ip(1)).is_ok());
        }
        assert_eq!(
            limits.check_publish(ip(1)),
            Err(RateLimitError::PublishLimitExceeded)
        );
    }

    #[test]
    fn tunnel_limit_allows_within_quota() {
        let limits = RateLimits::new(&test_config());

        assert!(limits.check_tunnel(ip(1)).is_ok());
        assert!(limits.check_tunnel(ip(1)).is_ok());
        assert_eq!(
            limits.check_tunnel(ip(1)),
            Err(RateLimitError::TunnelLimitExceeded)
        );
    }

    #[test]
    fn different_clients_have_independent_limits() {
        let limits = RateLimits::new(&test_config());

        for _ in 0..5 {
            assert!(limits.check_publish(ip(1)).is_ok());
        }
        assert!(limits.check_publish(ip(1)).is_err());
        assert!(limits.check_publish(ip(2)).is_ok());
    }

    #[test]
    fn publish_and_tunnel_quotas_are_separate() {
        let limits = RateLimits::new(&test_config());

        for _ in 0..5 {
            limits.check_publish(ip(1)).unwrap();
        }
        assert!(limits.check_tunnel(ip(1)).is_ok());
    }

    #[test]
    fn global_rate_limiter_rejects_excess() {
        let limits = RateLimits::new(&LimitsConfig {
            global_requests_per_second: 5,
            ..test_config()
        });

        for _ in 0..5 {
            assert!(limits.check_global().is_ok());
        }
        assert_eq!(
            limits.check_global(),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn zero_quota_still_allows_one() {
        let limits = RateLimits::new(&LimitsConfig {
            publishes_per_minute: 0,
            ..test_config()
        });
        assert!(limits.check_publish(ip(1)).is_ok());
        assert!(limits.check_publish(ip(1)).is_err());
    }

    #[test]
    fn shrink_does_not_panic() {
        let limits = RateLimits::new(&test_config());
        let _ = limits.check_publish(ip(1));
        let _ = limits.check_tunnel(ip(2));
        assert!(limits.publish_keys_count() > 0);

        // Freshly used entries may or may not be evicted depending on timing.
        limits.shrink();
    }

    #[test]
    fn rate_limits_are_debug() {
        let limits = RateLimits::new(&test_config());
        assert!(format!("{limits:?}").contains("RateLimits"));
    }
}

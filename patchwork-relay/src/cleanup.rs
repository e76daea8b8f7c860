//! Background cleanup task.
//!
//! Runs periodically to drop key cache entries long past their TTL and rate
//! limiter entries for clients that have gone quiet. Channels need no sweep;
//! the registry drops each one with its last waiter.

use crate::config::CleanupConfig;
use crate::server::Relay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Cache entries are kept this many TTLs so they can still serve as a stale
/// fallback during a provider outage.
const STALE_RETENTION_FACTOR: u32 = 12;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<Relay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&relay).await;
        }
    })
}

/// One cleanup pass.
pub async fn run_once(relay: &Relay) {
    let cache = relay.resolver().cache();
    let max_age = cache.ttl().saturating_mul(STALE_RETENTION_FACTOR);
    let evicted = cache.evict_older_than(max_age).await;

    relay.rate_limits().shrink();

    if evicted > 0 {
        tracing::info!("Cleanup: removed {} expired key sets", evicted);
    } else {
        tracing::debug!("Cleanup: nothing to remove");
    }
}

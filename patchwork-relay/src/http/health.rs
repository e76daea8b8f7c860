//! Health check endpoints.

use crate::server::Relay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status: `ok`, or `shutting_down` once shutdown has begun.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of live channels.
    pub channels: usize,
    /// Number of blocked subscribers.
    pub waiters: usize,
    /// Number of tunnels currently relaying.
    pub tunnels: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler, served on `/healthz` and `/status`.
pub async fn health_handler(Extension(relay): Extension<Arc<Relay>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let status = if relay.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        channels: relay.total_channels(),
        waiters: relay.total_waiters(),
        tunnels: relay.metrics().tunnels_active.load(Ordering::Relaxed),
        uptime_seconds: uptime,
    })
}

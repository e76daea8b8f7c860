//! Prometheus metrics endpoint.

use crate::server::Relay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns gauges (current state) and counters (monotonic since startup) in
/// Prometheus text format.
pub async fn metrics_handler(Extension(relay): Extension<Arc<Relay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay).await,
    )
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

async fn render(relay: &Relay) -> String {
    let m = relay.metrics();
    let stats = relay.resolver().stats();
    let cached = relay.resolver().cache().len().await;

    let gauges: [(&str, &str, u64); 5] = [
        ("channels_active", "Number of live channels", relay.total_channels() as u64),
        ("waiters_active", "Number of blocked subscribers", relay.total_waiters() as u64),
        ("tunnels_active", "Number of tunnels currently relaying", load(&m.tunnels_active)),
        ("key_cache_entries", "Number of cached key sets", cached as u64),
        (
            "rate_limit_keys",
            "Client addresses tracked by rate limiters",
            (relay.rate_limits().publish_keys_count() + relay.rate_limits().tunnel_keys_count())
                as u64,
        ),
    ];

    let counters: [(&str, &str, u64); 17] = [
        ("publishes_total", "Publishes accepted", load(&m.publishes_total)),
        ("deliveries_total", "Messages handed to subscribers", load(&m.deliveries_total)),
        ("bytes_received_total", "Publish body bytes accepted", load(&m.bytes_received)),
        ("subscribes_total", "Subscribe calls started", load(&m.subscribes_total)),
        ("subscribe_timeouts_total", "Subscribe calls that timed out", load(&m.subscribe_timeouts)),
        (
            "subscribe_cancellations_total",
            "Subscribe calls released by shutdown",
            load(&m.subscribe_cancellations),
        ),
        ("auth_failures_total", "Publishes rejected by signature checks", load(&m.auth_failures)),
        (
            "resolution_failures_total",
            "Publishes rejected because keys could not be resolved",
            load(&m.resolution_failures),
        ),
        ("key_cache_hits_total", "Key lookups served from cache", load(&stats.cache_hits)),
        ("key_cache_misses_total", "Key lookups sent to the provider", load(&stats.cache_misses)),
        (
            "key_cache_stale_total",
            "Provider failures answered from a stale entry",
            load(&stats.stale_served),
        ),
        (
            "key_provider_failures_total",
            "Provider failures with nothing cached",
            load(&stats.failures),
        ),
        ("rate_limit_hits_total", "Rate limit rejections", load(&m.rate_limit_hits)),
        ("tunnels_opened_total", "Tunnels upgraded", load(&m.tunnels_opened)),
        ("tunnels_failed_total", "Tunnel requests failed before upgrade", load(&m.tunnels_failed)),
        (
            "tunnel_bytes_up_total",
            "Bytes relayed from websocket clients to tcp targets",
            load(&m.tunnel_bytes_up),
        ),
        (
            "tunnel_bytes_down_total",
            "Bytes relayed from tcp targets to websocket clients",
            load(&m.tunnel_bytes_down),
        ),
    ];

    let mut body = format!(
        "# HELP patchwork_info Server information\n\
         # TYPE patchwork_info gauge\n\
         patchwork_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );
    for (name, help, value) in gauges {
        write_metric(&mut body, name, help, "gauge", value);
    }
    for (name, help, value) in counters {
        write_metric(&mut body, name, help, "counter", value);
    }
    body
}

fn write_metric(body: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = write!(
        body,
        "\n# HELP patchwork_{name} {help}\n# TYPE patchwork_{name} {kind}\npatchwork_{name} {value}\n"
    );
}

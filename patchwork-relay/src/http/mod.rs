//! HTTP endpoints for patchwork-relay.
//!
//! Channel routes (`/p`, `/u`, `/w`, `/k`, `/g`), the `/huproxy` tunnel, and
//! health and metrics endpoints.

mod channel;
pub mod health;
mod metrics;
mod tunnel;

use crate::server::Relay;
use axum::extract::DefaultBodyLimit;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use channel::ScopeKind;
pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<Relay>) -> Router {
    let body_limit = relay.config().server.max_message_bytes;

    let mut router = Router::new();
    for kind in [
        ScopeKind::Public,
        ScopeKind::Username,
        ScopeKind::WebCryptoKey,
        ScopeKind::SshKey,
        ScopeKind::Gist,
    ] {
        router = router.route(kind.route(), channel::channel_route(kind));
    }

    router
        .route("/huproxy/:host/:port", get(tunnel::tunnel_handler))
        .route("/healthz", get(health::health_handler))
        .route("/status", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(relay))
}

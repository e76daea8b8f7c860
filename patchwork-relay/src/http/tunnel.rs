//! `/huproxy/{host}/{port}` endpoint.

use crate::error::{RelayError, TunnelError};
use crate::server::Relay;
use crate::tunnel::{run_tunnel, TunnelTarget};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Validate the target, dial it, then upgrade and relay.
///
/// Every failure before the upgrade is an ordinary HTTP error response.
pub async fn tunnel_handler(
    Extension(relay): Extension<Arc<Relay>>,
    client: Option<ConnectInfo<SocketAddr>>,
    Path((host, port)): Path<(String, String)>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !relay.config().tunnel.enabled {
        return RelayError::from(TunnelError::Disabled).into_response();
    }

    let target = match TunnelTarget::parse(&host, &port) {
        Ok(target) => target,
        Err(e) => return fail(&relay, e.into()),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    if let Err(e) = relay.check_tunnel_rate(client.map(|ConnectInfo(addr)| addr.ip())) {
        return e.into_response();
    }

    let connect_timeout = Duration::from_secs(relay.config().tunnel.connect_timeout_secs);
    let stream = match target.dial(connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => return fail(&relay, e.into()),
    };

    tracing::debug!(dest = %target, "Tunnel target connected, upgrading");
    ws.on_upgrade(move |socket| run_tunnel(relay, target, socket, stream))
}

fn fail(relay: &Relay, error: RelayError) -> Response {
    relay.metrics().tunnels_failed.fetch_add(1, Ordering::Relaxed);
    error.into_response()
}

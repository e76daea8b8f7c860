//! WebSocket ⇄ TCP tunnel.
//!
//! The target is dialed before the WebSocket upgrade so that an unreachable
//! host is reported as a plain HTTP error. Once upgraded, two tasks copy
//! bytes in each direction; when either finishes, the other is aborted and
//! both halves are dropped.

use crate::error::TunnelError;
use crate::server::Relay;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Read buffer size for the TCP → WebSocket direction.
pub const TUNNEL_BUFFER_SIZE: usize = 32 * 1024;

/// A validated dial target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    /// Host name or IP literal, without brackets.
    pub host: String,
    /// TCP port, never zero.
    pub port: u16,
}

impl TunnelTarget {
    /// Validate the host and port path segments.
    pub fn parse(host: &str, port: &str) -> Result<Self, TunnelError> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(TunnelError::BadTarget {
                reason: format!("invalid host {host:?}"),
            });
        }

        let port = match port.parse::<u16>() {
            Ok(p) if p != 0 => p,
            _ => {
                return Err(TunnelError::BadTarget {
                    reason: format!("port must be 1-65535, got {port:?}"),
                })
            }
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Open a TCP connection, giving up after `timeout`.
    pub async fn dial(&self, timeout: Duration) -> Result<TcpStream, TunnelError> {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => {
                // Interactive traffic (ssh) is latency sensitive.
                let _ = stream.set_nodelay(true);
                Ok(stream)
            }
            Ok(Err(source)) => Err(TunnelError::DialFailed {
                target: self.to_string(),
                source,
            }),
            Err(_) => Err(TunnelError::DialTimeout {
                target: self.to_string(),
                secs: timeout.as_secs(),
            }),
        }
    }
}

impl std::fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Keeps the active-tunnel gauge in step with live tunnels.
struct ActiveTunnel(Arc<Relay>);

impl ActiveTunnel {
    fn new(relay: Arc<Relay>) -> Self {
        let metrics = relay.metrics();
        metrics.tunnels_opened.fetch_add(1, Ordering::Relaxed);
        metrics.tunnels_active.fetch_add(1, Ordering::Relaxed);
        Self(relay)
    }
}

impl Drop for ActiveTunnel {
    fn drop(&mut self) {
        self.0.metrics().tunnels_active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Copy bytes between an upgraded WebSocket and a connected TCP stream until
/// either side closes.
pub async fn run_tunnel(
    relay: Arc<Relay>,
    target: TunnelTarget,
    socket: WebSocket,
    stream: TcpStream,
) {
    let _active = ActiveTunnel::new(relay.clone());
    tracing::info!(dest = %target, "Tunnel opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut tcp_rx, mut tcp_tx) = stream.into_split();

    let up_relay = relay.clone();
    let mut upstream = tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let data = match frame {
                Ok(Message::Binary(data)) => data,
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Err(e) => {
                    tracing::debug!("Tunnel websocket read failed: {}", e);
                    break;
                }
            };
            if let Err(e) = tcp_tx.write_all(&data).await {
                tracing::debug!("Tunnel tcp write failed: {}", e);
                break;
            }
            up_relay
                .metrics()
                .tunnel_bytes_up
                .fetch_add(data.len() as u64, Ordering::Relaxed);
        }
        let _ = tcp_tx.shutdown().await;
    });

    let down_relay = relay.clone();
    let mut downstream = tokio::spawn(async move {
        let mut buf = vec![0u8; TUNNEL_BUFFER_SIZE];
        loop {
            let n = match tcp_rx.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Tunnel tcp read failed: {}", e);
                    break;
                }
            };
            if ws_tx.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                break;
            }
            down_relay
                .metrics()
                .tunnel_bytes_down
                .fetch_add(n as u64, Ordering::Relaxed);
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    tokio::select! {
        _ = &mut upstream => downstream.abort(),
        _ = &mut downstream => upstream.abort(),
    }

    tracing::info!(dest = %target, "Tunnel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parses_valid_targets() {
        let target = TunnelTarget::parse("example.com", "22").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 22);
        assert_eq!(target.to_string(), "example.com:22");

        let v6 = TunnelTarget::parse("[::1]", "2222").unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:2222");
    }

    #[test]
    fn rejects_bad_ports() {
        for port in ["0", "65536", "-1", "ssh", "", "22x"] {
            assert!(
                matches!(
                    TunnelTarget::parse("localhost", port),
                    Err(TunnelError::BadTarget { .. })
                ),
                "port {port:?} should be rejected"
            );
        }
        assert!(TunnelTarget::parse("localhost", "65535").is_ok());
        assert!(TunnelTarget::parse("localhost", "1").is_ok());
    }

    #[test]
    fn rejects_bad_hosts() {
        assert!(TunnelTarget::parse("", "22").is_err());
        assert!(TunnelTarget::parse("a b", "22").is_err());
    }

    #[tokio::test]
    async fn dial_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = TunnelTarget::parse("127.0.0.1", &port.to_string()).unwrap();
        assert!(target.dial(Duration::from_secs(5)).await.is_ok());
    }

    #[tokio::test]
    async fn dial_refused_is_dial_failed() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = TunnelTarget::parse("127.0.0.1", &port.to_string()).unwrap();
        let err = target.dial(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, TunnelError::DialFailed { .. }));
    }
}

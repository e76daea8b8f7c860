//! `/huproxy` tunnel against real loopback sockets.

mod common;

use common::{spawn_server, test_relay, FakeProvider};
use futures_util::{SinkExt, StreamExt};
use patchwork_relay::config::Config;
use patchwork_relay::server::Relay;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// TCP server that echoes everything back, one connection at a time.
async fn spawn_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

async fn wait_for_active_tunnels(relay: &Relay, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.metrics().tunnels_active.load(Ordering::Relaxed) != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("active tunnel gauge did not settle");
}

#[tokio::test]
async fn tunnel_relays_bytes_both_ways() {
    let relay = test_relay(Arc::new(FakeProvider::default()));
    let addr = spawn_server(relay.clone()).await;
    let echo_port = spawn_echo_server().await;

    let url = format!("ws://{addr}/huproxy/127.0.0.1/{echo_port}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    ws.send(Message::Binary(b"SSH-2.0-test\r\n".to_vec()))
        .await
        .unwrap();

    let mut echoed = Vec::new();
    while echoed.len() < 14 {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no echo within 5s")
            .expect("stream ended")
            .unwrap();
        if let Message::Binary(data) = frame {
            echoed.extend_from_slice(&data);
        }
    }
    assert_eq!(echoed, b"SSH-2.0-test\r\n");
    assert_eq!(relay.metrics().tunnels_active.load(Ordering::Relaxed), 1);

    ws.close(None).await.unwrap();
    wait_for_active_tunnels(&relay, 0).await;

    let metrics = relay.metrics();
    assert_eq!(metrics.tunnels_opened.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.tunnel_bytes_up.load(Ordering::Relaxed), 14);
    assert_eq!(metrics.tunnel_bytes_down.load(Ordering::Relaxed), 14);
}

#[tokio::test]
async fn target_closing_ends_the_tunnel() {
    let relay = test_relay(Arc::new(FakeProvider::default()));
    let addr = spawn_server(relay.clone()).await;

    // Accept one connection and hang up immediately.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let url = format!("ws://{addr}/huproxy/127.0.0.1/{port}");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    // The client sees the socket end rather than hanging.
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(frame)) = ws.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "tunnel stayed open after target closed");
    wait_for_active_tunnels(&relay, 0).await;
}

#[tokio::test]
async fn unreachable_target_fails_before_upgrade() {
    let relay = test_relay(Arc::new(FakeProvider::default()));
    let addr = spawn_server(relay.clone()).await;

    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let url = format!("ws://{addr}/huproxy/127.0.0.1/{closed_port}");
    let result = tokio::time::timeout(
        Duration::from_secs(15),
        tokio_tungstenite::connect_async(url),
    )
    .await
    .expect("dial failure was not reported in bounded time");

    match result {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 502),
        Err(e) => panic!("expected HTTP 502, got {e}"),
        Ok(_) => panic!("expected HTTP 502, upgrade succeeded"),
    }
    assert_eq!(relay.metrics().tunnels_failed.load(Ordering::Relaxed), 1);
    assert_eq!(relay.metrics().tunnels_opened.load(Ordering::Relaxed), 0);
}

/// A listener that never accepts, with its accept queue already full.
///
/// Further handshakes to its port stall. Returns the listener and the queued
/// connections, which must stay alive for the duration of the test.
async fn spawn_stalled_listener() -> (TcpListener, Vec<TcpStream>, u16) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let addr = listener.local_addr().unwrap();

    let mut queued = Vec::new();
    for _ in 0..16 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            Ok(Err(e)) => panic!("filling accept queue failed: {e}"),
            Err(_) => return (listener, queued, addr.port()),
        }
    }
    panic!("accept queue never filled");
}

#[tokio::test]
async fn stalled_target_times_out_before_upgrade() {
    let mut config = Config::default();
    config.tunnel.connect_timeout_secs = 1;
    let relay = Arc::new(Relay::new(config, Arc::new(FakeProvider::default())));
    let addr = spawn_server(relay.clone()).await;
    let (_listener, _queued, port) = spawn_stalled_listener().await;

    let url = format!("ws://{addr}/huproxy/127.0.0.1/{port}");
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tokio_tungstenite::connect_async(url),
    )
    .await
    .expect("dial timeout was not reported in bounded time");
    let elapsed = started.elapsed();

    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status().as_u16(), 504);
            let body: serde_json::Value =
                serde_json::from_slice(response.body().as_deref().unwrap_or_default()).unwrap();
            assert_eq!(body["error"], "tunnel_dial_timeout");
        }
        Err(e) => panic!("expected HTTP 504, got {e}"),
        Ok(_) => panic!("expected HTTP 504, upgrade succeeded"),
    }
    assert!(elapsed >= Duration::from_millis(900), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "gave up late: {elapsed:?}");
    assert_eq!(relay.metrics().tunnels_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn bad_port_is_rejected_before_upgrade() {
    let relay = test_relay(Arc::new(FakeProvider::default()));
    let addr = spawn_server(relay).await;

    let url = format!("ws://{addr}/huproxy/127.0.0.1/0");
    match tokio_tungstenite::connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 400),
        Err(e) => panic!("expected HTTP 400, got {e}"),
        Ok(_) => panic!("expected HTTP 400, upgrade succeeded"),
    }
}

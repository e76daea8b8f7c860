//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use patchwork_relay::config::Config;
use patchwork_relay::error::ProviderError;
use patchwork_relay::http::build_router;
use patchwork_relay::keys::KeyProvider;
use patchwork_relay::server::Relay;
use patchwork_types::TrustedKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory identity provider that counts lookups.
#[derive(Default)]
pub struct FakeProvider {
    pub users: Mutex<HashMap<String, Vec<TrustedKey>>>,
    pub gists: Mutex<HashMap<String, Vec<TrustedKey>>>,
    pub failing: AtomicBool,
    pub calls: AtomicU64,
}

impl FakeProvider {
    pub fn with_user(username: &str, keys: Vec<TrustedKey>) -> Self {
        let provider = Self::default();
        provider.users.lock().insert(username.to_string(), keys);
        provider
    }

    pub fn with_gist(gist_id: &str, keys: Vec<TrustedKey>) -> Self {
        let provider = Self::default();
        provider.gists.lock().insert(gist_id.to_string(), keys);
        provider
    }

    pub fn failing() -> Self {
        let provider = Self::default();
        provider.failing.store(true, Ordering::SeqCst);
        provider
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(ProviderError::Network("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyProvider for FakeProvider {
    async fn user_keys(&self, username: &str) -> Result<Vec<TrustedKey>, ProviderError> {
        self.check()?;
        Ok(self.users.lock().get(username).cloned().unwrap_or_default())
    }

    async fn gist_keys(&self, gist_id: &str) -> Result<Vec<TrustedKey>, ProviderError> {
        self.check()?;
        Ok(self.gists.lock().get(gist_id).cloned().unwrap_or_default())
    }
}

pub fn test_relay(provider: Arc<FakeProvider>) -> Arc<Relay> {
    Arc::new(Relay::new(Config::default(), provider))
}

/// Serve `relay` on an ephemeral loopback port.
pub async fn spawn_server(relay: Arc<Relay>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(relay);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Poll until `relay` has exactly `count` waiters, panicking after 5s.
pub async fn wait_for_waiters(relay: &Relay, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.total_waiters() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {count} waiters, still have {}",
            relay.total_waiters()
        )
    });
}

/// Armored SSH signature with its line breaks removed, as sent in a header.
pub fn header_safe(armored: &str) -> String {
    armored.lines().collect::<Vec<_>>().join("")
}

//! Channel endpoints: publish (`POST`/`PUT`) and subscribe (`GET`).

use crate::error::{RelayError, Result};
use crate::registry::{Message, WaitOutcome};
use crate::server::{PublishReceipt, Relay, SIGNATURE_HEADER};
use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, QueryRejection};
use axum::extract::{ConnectInfo, Path, Query};
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, MethodRouter};
use axum::{Extension, Json};
use patchwork_types::Scope;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Default content type of delivered messages.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Which URL prefix a channel route was mounted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `/p/{path}`
    Public,
    /// `/u/{username}/{path}`
    Username,
    /// `/w/{pubkey}/{path}`
    WebCryptoKey,
    /// `/k/{pubkey}/{path}`
    SshKey,
    /// `/g/{gist_id}/{path}`
    Gist,
}

impl ScopeKind {
    /// Route pattern for this prefix.
    pub fn route(self) -> &'static str {
        match self {
            Self::Public => "/p/*path",
            Self::Username => "/u/:reference/*path",
            Self::WebCryptoKey => "/w/:reference/*path",
            Self::SshKey => "/k/:reference/*path",
            Self::Gist => "/g/:reference/*path",
        }
    }

    fn scope(self, reference: Option<String>) -> Result<Scope> {
        let reference = match (self, reference) {
            (Self::Public, _) => return Ok(Scope::Public),
            (_, Some(reference)) => reference,
            (_, None) => {
                return Err(RelayError::MalformedRequest {
                    reason: "missing scope reference".to_string(),
                })
            }
        };
        Ok(match self {
            Self::Public => Scope::Public,
            Self::Username => Scope::Username(reference),
            Self::WebCryptoKey => Scope::WebCryptoKey(reference),
            Self::SshKey => Scope::SshKey(reference),
            Self::Gist => Scope::Gist(reference),
        })
    }
}

/// Path parameters shared by every channel route.
#[derive(Debug, Deserialize)]
pub struct ChannelPath {
    reference: Option<String>,
    path: String,
}

/// Subscribe query string.
#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    /// Seconds to wait; defaults and caps come from `[channels]`.
    timeout: Option<u64>,
}

/// Publish and subscribe handlers for one scope prefix.
///
/// `HEAD` is refused rather than falling through to `GET`: a subscribe whose
/// body is never sent would still consume a delivery.
pub fn channel_route(kind: ScopeKind) -> MethodRouter {
    get(
        move |relay: Extension<Arc<Relay>>,
              params: Path<ChannelPath>,
              query: std::result::Result<Query<WaitQuery>, QueryRejection>| {
            subscribe(kind, relay, params, query)
        },
    )
    .post(
        move |relay: Extension<Arc<Relay>>,
              client: Option<ConnectInfo<SocketAddr>>,
              params: Path<ChannelPath>,
              headers: HeaderMap,
              body: std::result::Result<Bytes, BytesRejection>| {
            publish(kind, relay, client, params, headers, body)
        },
    )
    .put(
        move |relay: Extension<Arc<Relay>>,
              client: Option<ConnectInfo<SocketAddr>>,
              params: Path<ChannelPath>,
              headers: HeaderMap,
              body: std::result::Result<Bytes, BytesRejection>| {
            publish(kind, relay, client, params, headers, body)
        },
    )
    .head(reject_head)
}

async fn reject_head() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, [(ALLOW, "GET, POST, PUT")]).into_response()
}

async fn publish(
    kind: ScopeKind,
    Extension(relay): Extension<Arc<Relay>>,
    client: Option<ConnectInfo<SocketAddr>>,
    Path(params): Path<ChannelPath>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<PublishReceipt>> {
    relay.check_publish_rate(client.map(|ConnectInfo(addr)| addr.ip()))?;

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RelayError::PayloadTooLarge {
                limit: relay.config().server.max_message_bytes,
            }
        } else {
            RelayError::MalformedRequest {
                reason: rejection.body_text(),
            }
        }
    })?;

    let signature = match headers.get(SIGNATURE_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| RelayError::MalformedRequest {
            reason: format!("{SIGNATURE_HEADER} header is not ASCII"),
        })?),
        None => None,
    };
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let scope = kind.scope(params.reference)?;
    let receipt = relay
        .publish(&scope, &params.path, Message::new(body, content_type), signature)
        .await?;

    tracing::debug!(
        "Publish to {} delivered to {} waiters",
        receipt.channel,
        receipt.delivered
    );
    Ok(Json(receipt))
}

async fn subscribe(
    kind: ScopeKind,
    Extension(relay): Extension<Arc<Relay>>,
    Path(params): Path<ChannelPath>,
    query: std::result::Result<Query<WaitQuery>, QueryRejection>,
) -> Result<Response> {
    relay.check_global_rate()?;

    let Query(query) = query.map_err(|rejection| RelayError::MalformedRequest {
        reason: rejection.body_text(),
    })?;
    let timeout = relay.config().channels.effective_wait(query.timeout);
    let scope = kind.scope(params.reference)?;

    match relay.subscribe(&scope, &params.path, timeout).await? {
        WaitOutcome::Delivered(message) => {
            let content_type = message
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            Ok(([(CONTENT_TYPE, content_type)], message.body).into_response())
        }
        WaitOutcome::TimedOut => Ok(StatusCode::NO_CONTENT.into_response()),
        WaitOutcome::Canceled => Err(RelayError::ShuttingDown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_kinds_build_scopes() {
        assert_eq!(ScopeKind::Public.scope(None).unwrap(), Scope::Public);
        assert_eq!(
            ScopeKind::Username.scope(Some("alice".into())).unwrap(),
            Scope::Username("alice".into())
        );
        assert_eq!(
            ScopeKind::Gist.scope(Some("abc".into())).unwrap(),
            Scope::Gist("abc".into())
        );
        assert!(ScopeKind::SshKey.scope(None).is_err());
    }

    #[test]
    fn routes_are_distinct() {
        let routes = [
            ScopeKind::Public,
            ScopeKind::Username,
            ScopeKind::WebCryptoKey,
            ScopeKind::SshKey,
            ScopeKind::Gist,
        ]
        .map(ScopeKind::route);
        for (i, a) in routes.iter().enumerate() {
            for b in &routes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}

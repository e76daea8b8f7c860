//! Error types for patchwork-relay.
//!
//! [`RelayError`] is what request handlers return. Its `IntoResponse` impl is
//! the single place where error kinds become HTTP statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use patchwork_types::{ScopeError, SignatureError};
use serde::Serialize;

/// Main error type for request handling.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Bad path segment, query parameter or header encoding.
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// What was wrong.
        reason: String,
    },

    /// URL-embedded reference (key, username, gist id) could not be used.
    #[error("malformed reference: {0}")]
    MalformedReference(#[from] ScopeError),

    /// Signature blob could not be parsed.
    #[error("bad signature format: {0}")]
    BadSignature(#[from] SignatureError),

    /// Authenticated scope, but no signature header.
    #[error("missing signature: send a {header} header")]
    MissingSignature {
        /// Expected header name.
        header: &'static str,
    },

    /// Signature is well-formed but matches no trusted key.
    #[error("signature does not match any trusted key for {scope}")]
    SignatureMismatch {
        /// Scope the publish was checked against.
        scope: String,
    },

    /// Identity provider unreachable and nothing cached.
    #[error("key resolution unavailable: {0}")]
    ResolutionUnavailable(#[source] ResolveError),

    /// Publish body over the configured limit.
    #[error("payload too large: limit is {limit} bytes")]
    PayloadTooLarge {
        /// Maximum allowed size.
        limit: usize,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },

    /// Tunnel failure.
    #[error("tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Server is shutting down.
    #[error("server is shutting down")]
    ShuttingDown,
}

/// Identity provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Provider answered with a non-success status other than 404.
    #[error("provider returned HTTP {status} for {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Provider answered with a body we could not decode.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Identity resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The reference itself is unusable.
    #[error("malformed reference: {0}")]
    MalformedReference(#[from] ScopeError),

    /// The provider could not be reached and nothing usable is cached.
    #[error("could not resolve {reference}: {source}")]
    Unavailable {
        /// The external reference being resolved.
        reference: String,
        /// Underlying provider failure.
        source: ProviderError,
    },
}

impl From<ResolveError> for RelayError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::MalformedReference(e) => Self::MalformedReference(e),
            e @ ResolveError::Unavailable { .. } => Self::ResolutionUnavailable(e),
        }
    }
}

/// Tunnel endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Tunnel endpoint disabled by configuration.
    #[error("tunnel endpoint is disabled")]
    Disabled,

    /// Host or port segment is unusable.
    #[error("invalid tunnel target: {reason}")]
    BadTarget {
        /// What was wrong.
        reason: String,
    },

    /// TCP connect failed.
    #[error("could not connect to {target}: {source}")]
    DialFailed {
        /// `host:port` that was dialed.
        target: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// TCP connect did not complete in time.
    #[error("connecting to {target} timed out after {secs}s")]
    DialTimeout {
        /// `host:port` that was dialed.
        target: String,
        /// Connect timeout in seconds.
        secs: u64,
    },
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Stable machine-readable kind.
    pub error: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl RelayError {
    /// Stable error kind reported in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } | Self::MalformedReference(_) => "malformed_request",
            Self::BadSignature(_) => "bad_signature_format",
            Self::MissingSignature { .. } => "missing_signature",
            Self::SignatureMismatch { .. } => "signature_mismatch",
            Self::ResolutionUnavailable(_) => "resolution_unavailable",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimited { .. } => "rate_limited",
            Self::Tunnel(TunnelError::Disabled) => "tunnel_disabled",
            Self::Tunnel(TunnelError::BadTarget { .. }) => "tunnel_bad_target",
            Self::Tunnel(TunnelError::DialFailed { .. }) => "tunnel_dial_failed",
            Self::Tunnel(TunnelError::DialTimeout { .. }) => "tunnel_dial_timeout",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedRequest { .. }
            | Self::MalformedReference(_)
            | Self::BadSignature(_) => StatusCode::BAD_REQUEST,
            Self::MissingSignature { .. } => StatusCode::UNAUTHORIZED,
            Self::SignatureMismatch { .. } => StatusCode::FORBIDDEN,
            Self::ResolutionUnavailable(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Tunnel(TunnelError::Disabled) => StatusCode::NOT_FOUND,
            Self::Tunnel(TunnelError::BadTarget { .. }) => StatusCode::BAD_REQUEST,
            Self::Tunnel(TunnelError::DialFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Tunnel(TunnelError::DialTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }

        (
            status,
            Json(ErrorBody {
                error: self.kind(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Result type alias for request handling.
pub type Result<T> = std::result::Result<T, RelayError>;

//! Error types for patchwork-types.

use thiserror::Error;

/// A URL-embedded reference (username, gist id, public key, path) that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    /// Username does not follow the identity provider's handle rules.
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),

    /// Gist id is empty or contains non-alphanumeric characters.
    #[error("invalid gist id: {0:?}")]
    InvalidGistId(String),

    /// Public key in the URL could not be decoded.
    #[error("invalid public key: {reason}")]
    InvalidKey {
        /// Why decoding failed.
        reason: String,
    },

    /// Channel path exceeds the maximum length.
    #[error("channel path too long: {len} bytes (limit: {limit} bytes)")]
    PathTooLong {
        /// Actual path length.
        len: usize,
        /// Maximum allowed length.
        limit: usize,
    },
}

/// A signature blob that could not even be evaluated.
///
/// Distinct from a well-formed signature that fails verification, which is
/// reported as [`crate::Verdict::Invalid`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No signature content at all.
    #[error("signature is empty")]
    Empty,

    /// Signature body is not valid base64.
    #[error("signature is not valid base64: {0}")]
    Encoding(String),

    /// Base64 decoded, but the content is not an SSH signature.
    #[error("signature is not a valid SSH signature: {0}")]
    Format(String),

    /// Raw signature has the wrong length.
    #[error("signature has wrong length: {actual} bytes (expected {expected})")]
    Length {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },
}

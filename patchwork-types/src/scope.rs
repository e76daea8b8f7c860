//! Channel scopes and channel names.
//!
//! A scope is the trust strategy implied by the URL prefix. The scope prefix
//! and its reference are part of the channel name, so `/u/alice/x` and
//! `/u/bob/x` are different channels.

use crate::error::ScopeError;
use crate::signature::ProofEncoding;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;

/// Maximum length of the path part of a channel name, in bytes.
pub const MAX_CHANNEL_PATH_LEN: usize = 1024;

/// Longest handle the identity provider allows.
const MAX_USERNAME_LEN: usize = 39;

/// Generous upper bound for gist ids (currently 32 hex chars).
const MAX_GIST_ID_LEN: usize = 64;

/// Trust-resolution strategy for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `/p/...` - anyone may publish.
    Public,
    /// `/u/{username}/...` - keys listed by the identity provider for `username`.
    Username(String),
    /// `/k/{pubkey}/...` - base64url SSH wire-format public key.
    SshKey(String),
    /// `/w/{pubkey}/...` - base64url raw Ed25519 key as exported by WebCrypto.
    WebCryptoKey(String),
    /// `/g/{gist_id}/...` - keys listed in a gist document.
    Gist(String),
}

impl Scope {
    /// URL prefix for this scope.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Public => "p",
            Self::Username(_) => "u",
            Self::SshKey(_) => "k",
            Self::WebCryptoKey(_) => "w",
            Self::Gist(_) => "g",
        }
    }

    /// Human-readable scope kind, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Username(_) => "username",
            Self::SshKey(_) | Self::WebCryptoKey(_) => "raw-key",
            Self::Gist(_) => "gist",
        }
    }

    /// The URL-embedded reference, if the scope has one.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Public => None,
            Self::Username(r) | Self::SshKey(r) | Self::WebCryptoKey(r) | Self::Gist(r) => {
                Some(r)
            }
        }
    }

    /// The reference in the form used for channel names.
    ///
    /// Raw keys lose their optional base64 padding and usernames are
    /// lowercased, so every spelling of one identity names one channel.
    pub fn canonical_reference(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Public => None,
            Self::SshKey(key) | Self::WebCryptoKey(key) => {
                Some(Cow::Borrowed(key.trim_end_matches('=')))
            }
            Self::Username(username) if username.bytes().any(|b| b.is_ascii_uppercase()) => {
                Some(Cow::Owned(username.to_ascii_lowercase()))
            }
            Self::Username(reference) | Self::Gist(reference) => Some(Cow::Borrowed(reference)),
        }
    }

    /// Which signature format publishers on this scope must send.
    ///
    /// `None` for the public scope, which performs no check.
    pub fn proof_encoding(&self) -> Option<ProofEncoding> {
        match self {
            Self::Public => None,
            Self::WebCryptoKey(_) => Some(ProofEncoding::WebCrypto),
            Self::Username(_) | Self::SshKey(_) | Self::Gist(_) => Some(ProofEncoding::Ssh),
        }
    }

    /// Check that a username is a plausible provider handle.
    ///
    /// Alphanumerics and hyphens, 1-39 chars, no leading or trailing hyphen.
    pub fn validate_username(username: &str) -> Result<(), ScopeError> {
        let valid = !username.is_empty()
            && username.len() <= MAX_USERNAME_LEN
            && !username.starts_with('-')
            && !username.ends_with('-')
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');

        if valid {
            Ok(())
        } else {
            Err(ScopeError::InvalidUsername(username.to_string()))
        }
    }

    /// Check that a gist id is non-empty ASCII alphanumeric.
    pub fn validate_gist_id(gist_id: &str) -> Result<(), ScopeError> {
        let valid = !gist_id.is_empty()
            && gist_id.len() <= MAX_GIST_ID_LEN
            && gist_id.chars().all(|c| c.is_ascii_alphanumeric());

        if valid {
            Ok(())
        } else {
            Err(ScopeError::InvalidGistId(gist_id.to_string()))
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_reference() {
            Some(reference) => write!(f, "{}/{}", self.prefix(), reference),
            None => f.write_str(self.prefix()),
        }
    }
}

/// Fully-qualified channel name, e.g. `u/alice/inbox`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Build the channel name for `path` under `scope`.
    pub fn new(scope: &Scope, path: &str) -> Result<Self, ScopeError> {
        let path = path.trim_start_matches('/');
        if path.len() > MAX_CHANNEL_PATH_LEN {
            return Err(ScopeError::PathTooLong {
                len: path.len(),
                limit: MAX_CHANNEL_PATH_LEN,
            });
        }
        Ok(Self(format!("{scope}/{path}")))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_include_scope_and_reference() {
        let public = ChannelName::new(&Scope::Public, "lobby").unwrap();
        assert_eq!(public.as_str(), "p/lobby");

        let alice = ChannelName::new(&Scope::Username("alice".into()), "/inbox").unwrap();
        let bob = ChannelName::new(&Scope::Username("bob".into()), "inbox").unwrap();
        assert_eq!(alice.as_str(), "u/alice/inbox");
        assert_ne!(alice, bob);
    }

    #[test]
    fn same_path_in_different_scopes_differs() {
        let gist = ChannelName::new(&Scope::Gist("abc".into()), "x").unwrap();
        let user = ChannelName::new(&Scope::Username("abc".into()), "x").unwrap();
        assert_ne!(gist, user);
    }

    #[test]
    fn key_padding_does_not_split_channels() {
        let padded = ChannelName::new(&Scope::SshKey("AAAAC3Nz==".into()), "x").unwrap();
        let bare = ChannelName::new(&Scope::SshKey("AAAAC3Nz".into()), "x").unwrap();
        assert_eq!(padded, bare);
        assert_eq!(bare.as_str(), "k/AAAAC3Nz/x");

        let padded = ChannelName::new(&Scope::WebCryptoKey("q83v=".into()), "x").unwrap();
        let bare = ChannelName::new(&Scope::WebCryptoKey("q83v".into()), "x").unwrap();
        assert_eq!(padded, bare);
    }

    #[test]
    fn username_case_does_not_split_channels() {
        let upper = ChannelName::new(&Scope::Username("Alice".into()), "inbox").unwrap();
        let lower = ChannelName::new(&Scope::Username("alice".into()), "inbox").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "u/alice/inbox");
    }

    #[test]
    fn oversized_path_rejected() {
        let path = "a".repeat(MAX_CHANNEL_PATH_LEN + 1);
        let err = ChannelName::new(&Scope::Public, &path).unwrap_err();
        assert!(matches!(err, ScopeError::PathTooLong { .. }));
    }

    #[test]
    fn username_validation() {
        assert!(Scope::validate_username("octocat").is_ok());
        assert!(Scope::validate_username("a-b-c").is_ok());
        assert!(Scope::validate_username("").is_err());
        assert!(Scope::validate_username("-leading").is_err());
        assert!(Scope::validate_username("trailing-").is_err());
        assert!(Scope::validate_username("has/slash").is_err());
        assert!(Scope::validate_username("../etc").is_err());
        assert!(Scope::validate_username(&"x".repeat(40)).is_err());
    }

    #[test]
    fn gist_id_validation() {
        assert!(Scope::validate_gist_id("aa5a315d61ae9438b18d").is_ok());
        assert!(Scope::validate_gist_id("").is_err());
        assert!(Scope::validate_gist_id("abc?x=1").is_err());
    }

    #[test]
    fn proof_encoding_by_scope() {
        assert_eq!(Scope::Public.proof_encoding(), None);
        assert_eq!(
            Scope::WebCryptoKey("k".into()).proof_encoding(),
            Some(ProofEncoding::WebCrypto)
        );
        assert_eq!(
            Scope::Gist("g".into()).proof_encoding(),
            Some(ProofEncoding::Ssh)
        );
    }

    #[test]
    fn channel_name_serializes_as_string() {
        let name = ChannelName::new(&Scope::Public, "a/b").unwrap();
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"p/a/b\"");
    }
}

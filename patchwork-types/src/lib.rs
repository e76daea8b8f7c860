//! # patchwork-types
//!
//! Shared types for the patchwork relay.
//!
//! This crate provides the pieces both the relay and its clients need to agree on:
//! - [`Scope`], [`ChannelName`] - How a URL maps to a channel and its trust strategy
//! - [`TrustedKey`], [`TrustedKeySet`] - Public keys allowed to publish on a channel
//! - [`Proof`], [`Verdict`] - Detached signature parsing and verification
//! - [`SIGNATURE_NAMESPACE`] - The namespace every accepted signature is bound to

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod keys;
mod scope;
mod signature;

pub use error::{ScopeError, SignatureError};
pub use keys::{parse_key_lines, TrustedKey, TrustedKeySet};
pub use scope::{ChannelName, Scope, MAX_CHANNEL_PATH_LEN};
pub use signature::{
    sign_ssh, sign_webcrypto, webcrypto_message, Proof, ProofEncoding, Verdict,
    SIGNATURE_NAMESPACE,
};

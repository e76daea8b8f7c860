//! # patchwork-relay
//!
//! HTTP rendezvous relay with signature-gated channels.
//!
//! A subscriber blocks on `GET /{scope}/.../{path}`; a publisher `POST`s to the
//! same URL and the body is handed to every subscriber waiting at that moment.
//! Nothing is stored. Who may publish depends on the scope prefix:
//!
//! | Prefix | Trusted keys |
//! |---|---|
//! | `/p/` | anyone |
//! | `/u/{username}/` | SSH keys the identity provider lists for `username` |
//! | `/k/{pubkey}/` | the SSH key in the URL |
//! | `/w/{pubkey}/` | the raw Ed25519 (WebCrypto) key in the URL |
//! | `/g/{gist_id}/` | SSH keys listed in a gist |
//!
//! The same server also exposes `/huproxy/{host}/{port}`, a WebSocket to TCP
//! tunnel.
//!
//! ## Architecture
//!
//! ```text
//!  publisher ──POST──┐                       ┌──GET── subscriber
//!                    ▼                       │
//!        ┌───────────────────────────────────┴───┐
//!        │ http ─► Relay ─► IdentityResolver ─► KeyCache ─► GitHub
//!        │           │                           │
//!        │           └──► ChannelRegistry (waiters per channel)
//!        └───────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod keys;
pub mod limits;
pub mod registry;
pub mod server;
pub mod tunnel;

//! Trusted public keys.

use crate::error::ScopeError;
use crate::signature::{webcrypto_message, Proof, Verdict, SIGNATURE_NAMESPACE};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ssh_key::HashAlg;

/// A public key allowed to publish on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedKey {
    /// OpenSSH public key (Ed25519, ECDSA or RSA).
    Ssh(ssh_key::PublicKey),
    /// Raw Ed25519 key exported from WebCrypto.
    WebCrypto(ed25519_dalek::VerifyingKey),
}

impl TrustedKey {
    /// Decode a `/k/{pubkey}` reference: base64url SSH wire-format key.
    pub fn from_ssh_reference(reference: &str) -> Result<Self, ScopeError> {
        let bytes = decode_url_base64(reference)?;
        ssh_key::PublicKey::from_bytes(&bytes)
            .map(Self::Ssh)
            .map_err(|e| ScopeError::InvalidKey {
                reason: e.to_string(),
            })
    }

    /// Decode a `/w/{pubkey}` reference: base64url raw 32-byte Ed25519 key.
    pub fn from_webcrypto_reference(reference: &str) -> Result<Self, ScopeError> {
        let bytes = decode_url_base64(reference)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ScopeError::InvalidKey {
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            })?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self::WebCrypto)
            .map_err(|e| ScopeError::InvalidKey {
                reason: e.to_string(),
            })
    }

    /// Parse an OpenSSH `authorized_keys`-style line (`ssh-ed25519 AAAA... comment`).
    pub fn from_openssh(line: &str) -> Result<Self, ssh_key::Error> {
        ssh_key::PublicKey::from_openssh(line).map(Self::Ssh)
    }

    /// Encode this key the way it appears in a channel URL.
    pub fn to_reference(&self) -> Result<String, ssh_key::Error> {
        match self {
            Self::Ssh(key) => Ok(URL_SAFE_NO_PAD.encode(key.to_bytes()?)),
            Self::WebCrypto(key) => Ok(URL_SAFE_NO_PAD.encode(key.as_bytes())),
        }
    }

    /// Public fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Ssh(key) => key.fingerprint(HashAlg::Sha256).to_string(),
            Self::WebCrypto(key) => format!("ed25519:{}", URL_SAFE_NO_PAD.encode(key.as_bytes())),
        }
    }

    /// Check `proof` over `payload` against this key.
    ///
    /// A proof of the other format never verifies.
    pub fn verify(&self, payload: &[u8], proof: &Proof) -> Verdict {
        let ok = match (self, proof) {
            (Self::Ssh(key), Proof::Ssh(sig)) => {
                key.verify(SIGNATURE_NAMESPACE, payload, sig).is_ok()
            }
            (Self::WebCrypto(key), Proof::WebCrypto(sig)) => key
                .verify_strict(&webcrypto_message(payload), sig)
                .is_ok(),
            _ => false,
        };

        if ok {
            Verdict::Valid
        } else {
            Verdict::Invalid
        }
    }
}

fn decode_url_base64(reference: &str) -> Result<Vec<u8>, ScopeError> {
    URL_SAFE_NO_PAD
        .decode(reference)
        .or_else(|_| URL_SAFE.decode(reference))
        .map_err(|e| ScopeError::InvalidKey {
            reason: format!("not base64url: {e}"),
        })
}

/// Keys trusted for a channel's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedKeySet {
    /// Public scope: no signature required.
    AllowAll,
    /// Exactly these keys (possibly none).
    Keys(Vec<TrustedKey>),
}

impl TrustedKeySet {
    /// True for the public scope.
    pub fn allows_all(&self) -> bool {
        matches!(self, Self::AllowAll)
    }

    /// Number of explicit keys (0 for [`TrustedKeySet::AllowAll`]).
    pub fn len(&self) -> usize {
        match self {
            Self::AllowAll => 0,
            Self::Keys(keys) => keys.len(),
        }
    }

    /// True when no explicit key is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first key that verifies `proof` over `payload`, if any.
    ///
    /// Always `None` for [`TrustedKeySet::AllowAll`]; callers check
    /// [`TrustedKeySet::allows_all`] first.
    pub fn find_signer(&self, payload: &[u8], proof: &Proof) -> Option<&TrustedKey> {
        match self {
            Self::AllowAll => None,
            Self::Keys(keys) => keys
                .iter()
                .find(|key| key.verify(payload, proof) == Verdict::Valid),
        }
    }
}

/// Parse a key listing: one OpenSSH key per line.
///
/// Blank lines and `#` comments are ignored. `authorized_keys` options before
/// the key type are skipped. Lines that still do not parse are dropped and
/// duplicates are removed.
pub fn parse_key_lines(text: &str) -> Vec<TrustedKey> {
    let mut keys: Vec<TrustedKey> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = TrustedKey::from_openssh(line).or_else(|e| {
            line.find(|c: char| c.is_whitespace())
                .map(|idx| line[idx..].trim_start())
                .filter(|rest| looks_like_key_type(rest))
                .map_or(Err(e), TrustedKey::from_openssh)
        });

        if let Ok(key) = parsed {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys
}

fn looks_like_key_type(s: &str) -> bool {
    s.starts_with("ssh-") || s.starts_with("ecdsa-") || s.starts_with("sk-")
}

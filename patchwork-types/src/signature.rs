//! Detached signature parsing and signing.
//!
//! Two proof formats are accepted, both bound to [`SIGNATURE_NAMESPACE`]:
//! - **SSH**: OpenSSH `SSHSIG` armored signatures (`ssh-keygen -Y sign -n patchwork`)
//! - **WebCrypto**: raw Ed25519 signatures over `namespace || 0x00 || payload`
//!
//! Parsing is separate from verification so that a blob that cannot be
//! decoded is reported as a [`SignatureError`], never as [`Verdict::Invalid`].

use crate::error::SignatureError;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::Signer;
use ssh_key::{HashAlg, LineEnding, PrivateKey, SshSig};

/// Namespace every accepted signature must be bound to.
pub const SIGNATURE_NAMESPACE: &str = "patchwork";

const ARMOR_BEGIN: &str = "-----BEGIN SSH SIGNATURE-----";
const ARMOR_END: &str = "-----END SSH SIGNATURE-----";

/// Column width `ssh-keygen` uses for the armored body.
const ARMOR_LINE_WIDTH: usize = 70;

const ED25519_SIGNATURE_LEN: usize = 64;

/// Signature format expected by a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofEncoding {
    /// Armored OpenSSH signature.
    Ssh,
    /// Base64 raw Ed25519 signature.
    WebCrypto,
}

/// Outcome of checking a well-formed proof against one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The signature was made by the key over the payload in our namespace.
    Valid,
    /// The signature does not verify against the key.
    Invalid,
}

/// A decoded detached signature.
#[derive(Debug, Clone)]
pub enum Proof {
    /// OpenSSH signature (carries its own namespace and signer key).
    Ssh(SshSig),
    /// Raw Ed25519 signature.
    WebCrypto(ed25519_dalek::Signature),
}

impl Proof {
    /// Decode a signature as sent by a client.
    ///
    /// SSH signatures may arrive as a full armored block, as an armored block
    /// with its line breaks stripped (header transport), or as the bare base64
    /// body.
    pub fn parse(encoding: ProofEncoding, raw: &str) -> Result<Self, SignatureError> {
        match encoding {
            ProofEncoding::Ssh => parse_ssh(raw).map(Self::Ssh),
            ProofEncoding::WebCrypto => parse_webcrypto(raw).map(Self::WebCrypto),
        }
    }

    /// Format of this proof.
    pub fn encoding(&self) -> ProofEncoding {
        match self {
            Self::Ssh(_) => ProofEncoding::Ssh,
            Self::WebCrypto(_) => ProofEncoding::WebCrypto,
        }
    }
}

fn parse_ssh(raw: &str) -> Result<SshSig, SignatureError> {
    let body: String = raw
        .replace(ARMOR_BEGIN, "")
        .replace(ARMOR_END, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if body.is_empty() {
        return Err(SignatureError::Empty);
    }
    if !body.is_ascii() {
        return Err(SignatureError::Encoding("non-ASCII characters".to_string()));
    }
    STANDARD
        .decode(&body)
        .map_err(|e| SignatureError::Encoding(e.to_string()))?;

    // Re-wrap at the canonical width so the PEM decoder accepts header-flattened input.
    let mut armored = String::with_capacity(body.len() + body.len() / ARMOR_LINE_WIDTH + 64);
    armored.push_str(ARMOR_BEGIN);
    armored.push('\n');
    let mut rest = body.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(ARMOR_LINE_WIDTH));
        armored.push_str(line);
        armored.push('\n');
        rest = tail;
    }
    armored.push_str(ARMOR_END);
    armored.push('\n');

    SshSig::from_pem(armored).map_err(|e| SignatureError::Format(e.to_string()))
}

fn parse_webcrypto(raw: &str) -> Result<ed25519_dalek::Signature, SignatureError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SignatureError::Empty);
    }

    let bytes = [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(raw).ok())
        .ok_or_else(|| SignatureError::Encoding("not standard or URL-safe base64".to_string()))?;

    let bytes: [u8; ED25519_SIGNATURE_LEN] =
        bytes.as_slice().try_into().map_err(|_| SignatureError::Length {
            expected: ED25519_SIGNATURE_LEN,
            actual: bytes.len(),
        })?;

    Ok(ed25519_dalek::Signature::from_bytes(&bytes))
}

/// The exact bytes a WebCrypto publisher signs for `payload`.
pub fn webcrypto_message(payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNATURE_NAMESPACE.len() + 1 + payload.len());
    message.extend_from_slice(SIGNATURE_NAMESPACE.as_bytes());
    message.push(0);
    message.extend_from_slice(payload);
    message
}

/// Produce an armored SSH signature over `payload` in the patchwork namespace.
///
/// Equivalent to `ssh-keygen -Y sign -n patchwork`.
pub fn sign_ssh(key: &PrivateKey, payload: &[u8]) -> Result<String, ssh_key::Error> {
    key.sign(SIGNATURE_NAMESPACE, HashAlg::Sha512, payload)?
        .to_pem(LineEnding::LF)
}

/// Produce a base64 WebCrypto-style Ed25519 signature over `payload`.
pub fn sign_webcrypto(key: &ed25519_dalek::SigningKey, payload: &[u8]) -> String {
    STANDARD.encode(key.sign(&webcrypto_message(payload)).to_bytes())
}

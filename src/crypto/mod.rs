//! Crypto engine abstraction: OpenPGP and S/MIME (CMS) operations.
//!
//! The value types here are plain records copied into part metadata.
//! [`engine::CryptoEngine`] wraps a [`engine::Backend`] and enforces the
//! rules every caller depends on; [`gpg::GpgBackend`] is the subprocess
//! implementation.

pub mod engine;
pub mod gpg;
pub mod status;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use engine::{Backend, ContextOptions, CryptoEngine, EngineContext, KeyListMode};

/// Which family of crypto a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    /// OpenPGP (RFC 4880 / PGP/MIME).
    OpenPgp,
    /// S/MIME (CMS, PKCS#7).
    Cms,
}

impl Protocol {
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenPgp => "OpenPGP",
            Self::Cms => "S/MIME",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors from the crypto engine.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The engine binary or protocol backend is not available.
    #[error("Crypto engine unavailable: {0}")]
    Engine(String),

    /// No usable key was found.
    #[error("No key found: {0}")]
    NoKey(String),

    /// Passphrase entry failed or was cancelled.
    #[error("Bad passphrase or passphrase entry cancelled")]
    Passphrase,

    /// The ciphertext could not be decrypted.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// A key failed validation (revoked, expired, disabled, invalid, wrong capability).
    #[error("Key {fingerprint} is not usable: {reason}")]
    UnusableKey { fingerprint: String, reason: String },

    /// Talking to the engine failed.
    #[error("I/O error talking to crypto engine: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else the engine reported.
    #[error("Crypto engine error: {0}")]
    Unknown(String),
}

// ── Verification ────────────────────────────────────────────────

/// Verdict on one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignatureResult {
    Ok,
    Expired,
    KeyNotFound,
    Invalid,
}

/// Calculated validity of the signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum Validity {
    #[default]
    Unknown,
    Undefined,
    Never,
    Marginal,
    Full,
    Ultimate,
}

impl Validity {
    /// Full or ultimate validity.
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::Full | Self::Ultimate)
    }
}

/// One signature as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signature {
    pub fingerprint: String,
    /// Long key id of the signing (sub)key, when reported.
    pub key_id: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub trust_level: Validity,
    pub result: SignatureResult,
    /// The signing key was revoked.
    pub key_revoked: bool,
    /// The signature itself (not the key) has expired.
    pub sig_expired: bool,
    pub signer_name: String,
    pub signer_emails: Vec<String>,
}

impl Signature {
    pub fn is_good(&self) -> bool {
        self.result == SignatureResult::Ok
    }
}

/// Outcome of a verify call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub signatures: Vec<Signature>,
    /// Engine-level error text, if the call itself failed.
    pub error: Option<String>,
}

// ── Decryption ──────────────────────────────────────────────────

/// One recipient listed in the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub key_id: String,
    pub secret_key_available: bool,
}

/// Classification of a decrypt call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DecryptionOutcome {
    #[default]
    NoError,
    /// The input was not encrypted at all.
    NotEncrypted,
    PassphraseError,
    NoSecretKeyError,
    DecryptionError,
}

/// Outcome of a decrypt call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecryptionResult {
    pub recipients: Vec<Recipient>,
    pub error: Option<String>,
    pub outcome: DecryptionOutcome,
}

impl DecryptionResult {
    pub fn is_ok(&self) -> bool {
        self.outcome == DecryptionOutcome::NoError
    }

    /// A failed result carrying `message`.
    pub fn failed(outcome: DecryptionOutcome, message: impl Into<String>) -> Self {
        Self {
            recipients: Vec::new(),
            error: Some(message.into()),
            outcome,
        }
    }
}

// ── Keys ────────────────────────────────────────────────────────

/// One user id on a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserId {
    pub name: String,
    pub email: String,
    /// The full user id string.
    pub id: String,
}

impl UserId {
    /// Split `Name (comment) <email>` into its parts; the comment is dropped.
    pub fn parse(raw: &str) -> Self {
        let addr = crate::model::address::EmailAddress::parse(raw);
        let (name, email) = if addr.address.contains('@') {
            (addr.display_name, addr.address)
        } else {
            (raw.trim().to_string(), String::new())
        };
        Self {
            name,
            email,
            id: raw.to_string(),
        }
    }
}

/// A key (OpenPGP) or certificate (CMS) as listed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Key {
    pub key_id: String,
    pub short_key_id: String,
    pub fingerprint: String,
    pub user_ids: Vec<UserId>,
    pub revoked: bool,
    pub expired: bool,
    pub disabled: bool,
    pub invalid: bool,
    pub can_encrypt: bool,
    pub can_sign: bool,
    /// A secret key is available for this key.
    pub has_secret: bool,
}

impl Key {
    /// Neither revoked, expired, disabled nor invalid.
    pub fn is_usable(&self) -> bool {
        !(self.revoked || self.expired || self.disabled || self.invalid)
    }

    /// Last eight hex digits of a key id.
    pub fn short_id(key_id: &str) -> String {
        let start = key_id.len().saturating_sub(8);
        key_id.get(start..).unwrap_or(key_id).to_string()
    }
}

/// Counters reported by a key import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub considered: u32,
    pub imported: u32,
    pub unchanged: u32,
}

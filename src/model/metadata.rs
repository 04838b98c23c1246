//! Crypto metadata recorded on parts by the decrypt and verify passes.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Error recorded on a part when a crypto operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PartError {
    #[default]
    NoError,
    PassphraseError,
    NoKeyError,
    UnknownError,
}

impl PartError {
    pub fn is_error(self) -> bool {
        self != Self::NoError
    }

    /// Short user-facing description.
    pub fn description(self) -> &'static str {
        match self {
            Self::NoError => "",
            Self::PassphraseError => "Wrong passphrase.",
            Self::NoKeyError => "No key available.",
            Self::UnknownError => "Unknown error.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EncryptionState {
    #[default]
    NotEncrypted,
    PartiallyEncrypted,
    FullyEncrypted,
}

impl EncryptionState {
    pub fn is_encrypted(self) -> bool {
        self != Self::NotEncrypted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignatureState {
    #[default]
    NotSigned,
    PartiallySigned,
    FullySigned,
}

impl SignatureState {
    pub fn is_signed(self) -> bool {
        self != Self::NotSigned
    }
}

/// Overall trust classification shown to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Good,
    NotSoGood,
    Bad,
    Unknown,
}

impl SecurityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NotSoGood => "notsogood",
            Self::Bad => "bad",
            Self::Unknown => "unknown",
        }
    }

    /// Combined level. `signature` is the metadata of the signed part the
    /// state was derived from.
    pub fn classify(
        signed: SignatureState,
        encrypted: EncryptionState,
        signature: Option<&PartMetaData>,
    ) -> Self {
        if signed.is_signed() {
            if let Some(level) = Self::bad_signature(signature) {
                return level;
            }
        }
        if signed.is_signed() || encrypted.is_encrypted() {
            Self::Good
        } else {
            Self::Unknown
        }
    }

    pub fn for_signature(signed: SignatureState, signature: Option<&PartMetaData>) -> Self {
        if !signed.is_signed() {
            return Self::Unknown;
        }
        Self::bad_signature(signature).unwrap_or(Self::Good)
    }

    pub fn for_encryption(encrypted: EncryptionState, error: PartError) -> Self {
        if error.is_error() {
            Self::Bad
        } else if encrypted.is_encrypted() {
            Self::Good
        } else {
            Self::Unknown
        }
    }

    fn bad_signature(signature: Option<&PartMetaData>) -> Option<Self> {
        let good = signature.is_some_and(|m| m.is_good_signature);
        if good {
            return None;
        }
        let recoverable = signature.is_some_and(|m| m.key_missing || m.key_expired);
        Some(if recoverable { Self::NotSoGood } else { Self::Bad })
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature and encryption details of one part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartMetaData {
    pub key_missing: bool,
    pub key_expired: bool,
    pub key_revoked: bool,
    pub sig_expired: bool,
    pub crl_missing: bool,
    pub crl_too_old: bool,
    /// `Name <email>` of the signer, if known.
    pub signer: String,
    pub signer_mail_addresses: Vec<String>,
    /// Signing key id, or for encrypted parts the recipient key used.
    pub key_id: String,
    pub key_is_trusted: bool,
    /// Status line for display when no better information exists.
    pub status: String,
    pub error_text: String,
    pub creation_time: Option<DateTime<Utc>>,
    pub decryption_error: String,
    pub is_signed: bool,
    pub is_good_signature: bool,
    pub is_encrypted: bool,
    pub is_decryptable: bool,
    pub technical_problem: bool,
    pub is_encapsulated_rfc822: bool,
}

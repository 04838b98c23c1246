//! The engine seam and the rules layered on top of it.
//!
//! A [`Backend`] hands out [`EngineContext`]s, one per call, configured for
//! one protocol. Contexts own whatever the engine needs (processes, temp
//! files) and release it when dropped. [`CryptoEngine`] is what the rest of
//! the crate talks to: it applies the context options, never lets plaintext
//! escape a failed decryption, and refuses to encrypt to a key that fails
//! validation.

use crate::config::CryptoConfig;

use super::gpg::GpgBackend;
use super::{
    CryptoError, DecryptionOutcome, DecryptionResult, ImportResult, Key, Protocol,
    VerificationResult,
};

/// Where key listings look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyListMode {
    /// Local keyring only.
    #[default]
    Local,
    /// Key servers / directory lookups (results are imported).
    Extern,
}

/// Options applied to every context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// ASCII armor for produced signatures and ciphertext.
    pub armor: bool,
    /// Trust model for OpenPGP validity calculation.
    pub trust_model: String,
    /// Fetch unknown signer keys while verifying. Always off for contexts
    /// created by [`CryptoEngine`].
    pub auto_key_retrieve: bool,
    pub key_list_mode: KeyListMode,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            armor: true,
            trust_model: "tofu+pgp".to_string(),
            auto_key_retrieve: false,
            key_list_mode: KeyListMode::Local,
        }
    }
}

/// What a decrypt call produced, before [`CryptoEngine`] applies its rules.
#[derive(Debug, Clone, Default)]
pub struct RawDecryption {
    pub result: DecryptionResult,
    pub verification: VerificationResult,
    /// Everything the engine wrote, possibly partial output of a failed call.
    pub plaintext: Vec<u8>,
}

/// A detached signature and the digest algorithm used.
#[derive(Debug, Clone, Default)]
pub struct SignOutput {
    pub signature: Vec<u8>,
    /// Digest algorithm name as reported by the engine (`"SHA256"`).
    pub hash_algorithm: String,
}

/// One protocol-scoped engine session.
pub trait EngineContext {
    fn verify_detached(
        &mut self,
        signature: &[u8],
        signed: &[u8],
    ) -> Result<VerificationResult, CryptoError>;

    fn verify_opaque(&mut self, signed: &[u8])
        -> Result<(VerificationResult, Vec<u8>), CryptoError>;

    /// Decrypt, also verifying embedded signatures when `verify` is set.
    fn decrypt(&mut self, ciphertext: &[u8], verify: bool) -> Result<RawDecryption, CryptoError>;

    fn sign(&mut self, content: &[u8], signers: &[Key]) -> Result<SignOutput, CryptoError>;

    fn encrypt(
        &mut self,
        content: &[u8],
        recipients: &[Key],
        signers: &[Key],
    ) -> Result<Vec<u8>, CryptoError>;

    fn list_keys(&mut self, patterns: &[String], secret_only: bool)
        -> Result<Vec<Key>, CryptoError>;

    fn import(&mut self, data: &[u8]) -> Result<ImportResult, CryptoError>;

    fn export(&mut self, fingerprint: &str) -> Result<Vec<u8>, CryptoError>;
}

/// Factory for engine contexts.
pub trait Backend: Send + Sync {
    /// Create a context, failing with [`CryptoError::Engine`] if the
    /// protocol is not available.
    fn new_context(
        &self,
        protocol: Protocol,
        options: &ContextOptions,
    ) -> Result<Box<dyn EngineContext + '_>, CryptoError>;
}

/// Check that a key may be used: not revoked, expired, disabled or invalid,
/// and encryption-capable when `for_encryption` is set.
pub fn validate_key(key: &Key, for_encryption: bool) -> Result<(), CryptoError> {
    let reason = if key.revoked {
        Some("revoked")
    } else if key.expired {
        Some("expired")
    } else if key.disabled {
        Some("disabled")
    } else if key.invalid {
        Some("invalid")
    } else if for_encryption && !key.can_encrypt {
        Some("not encryption capable")
    } else {
        None
    };

    match reason {
        Some(reason) => {
            tracing::warn!(fingerprint = %key.fingerprint, reason, "Rejecting key");
            Err(CryptoError::UnusableKey {
                fingerprint: key.fingerprint.clone(),
                reason: reason.to_string(),
            })
        }
        None => Ok(()),
    }
}

/// Protocol-aware crypto operations over a [`Backend`].
pub struct CryptoEngine {
    backend: Box<dyn Backend>,
    options: ContextOptions,
}

impl CryptoEngine {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            options: ContextOptions::default(),
        }
    }

    /// Engine driving the configured `gpg`/`gpgsm` binaries.
    pub fn from_config(config: &CryptoConfig) -> Self {
        let mut engine = Self::new(GpgBackend::from_config(config));
        engine.options.armor = config.armor;
        engine.options.trust_model = config.trust_model.clone();
        engine
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Create a context for `protocol`. Automatic key retrieval is always
    /// disabled so a verification never reaches the network.
    pub fn new_context(
        &self,
        protocol: Protocol,
    ) -> Result<Box<dyn EngineContext + '_>, CryptoError> {
        self.context_with_mode(protocol, KeyListMode::Local)
    }

    fn context_with_mode(
        &self,
        protocol: Protocol,
        mode: KeyListMode,
    ) -> Result<Box<dyn EngineContext + '_>, CryptoError> {
        let options = ContextOptions {
            auto_key_retrieve: false,
            key_list_mode: mode,
            ..self.options.clone()
        };
        self.backend.new_context(protocol, &options)
    }

    pub fn verify_detached(
        &self,
        protocol: Protocol,
        signature: &[u8],
        signed: &[u8],
    ) -> Result<VerificationResult, CryptoError> {
        let mut ctx = self.new_context(protocol)?;
        let result = ctx.verify_detached(signature, signed)?;
        tracing::debug!(%protocol, signatures = result.signatures.len(), "Verified detached signature");
        Ok(result)
    }

    pub fn verify_opaque(
        &self,
        protocol: Protocol,
        signed: &[u8],
    ) -> Result<(VerificationResult, Vec<u8>), CryptoError> {
        let mut ctx = self.new_context(protocol)?;
        let (result, plaintext) = ctx.verify_opaque(signed)?;
        tracing::debug!(%protocol, signatures = result.signatures.len(), "Verified opaque signature");
        Ok((result, plaintext))
    }

    /// Decrypt and verify in one engine call.
    ///
    /// On a hard decryption failure the returned plaintext is empty, whatever
    /// the engine produced before failing.
    pub fn decrypt_and_verify(
        &self,
        protocol: Protocol,
        ciphertext: &[u8],
    ) -> Result<(DecryptionResult, VerificationResult, Vec<u8>), CryptoError> {
        let mut ctx = self.new_context(protocol)?;
        let raw = ctx.decrypt(ciphertext, true)?;
        let plaintext = scrub(&raw.result, raw.plaintext);
        tracing::info!(
            %protocol,
            outcome = ?raw.result.outcome,
            signatures = raw.verification.signatures.len(),
            "Decrypted"
        );
        Ok((raw.result, raw.verification, plaintext))
    }

    /// Decrypt without verifying. Same plaintext rule as [`Self::decrypt_and_verify`].
    pub fn decrypt(
        &self,
        protocol: Protocol,
        ciphertext: &[u8],
    ) -> Result<(DecryptionResult, Vec<u8>), CryptoError> {
        let mut ctx = self.new_context(protocol)?;
        let raw = ctx.decrypt(ciphertext, false)?;
        let plaintext = scrub(&raw.result, raw.plaintext);
        Ok((raw.result, plaintext))
    }

    /// Create an OpenPGP detached signature.
    ///
    /// Returns the signature and the `micalg` value for multipart/signed
    /// (`"pgp-sha256"`).
    pub fn sign(
        &self,
        content: &[u8],
        signing_keys: &[Key],
    ) -> Result<(Vec<u8>, String), CryptoError> {
        for key in signing_keys {
            validate_key(key, false)?;
        }
        let mut ctx = self.new_context(Protocol::OpenPgp)?;
        let out = ctx.sign(content, signing_keys)?;
        let micalg = format!("pgp-{}", out.hash_algorithm.to_lowercase());
        Ok((out.signature, micalg))
    }

    /// Encrypt to every key in `encryption_keys`, signing with `signing_keys`.
    ///
    /// Any key failing validation aborts the call before the engine is
    /// invoked; a message is never encrypted to a subset of the recipients.
    pub fn sign_and_encrypt(
        &self,
        content: &[u8],
        encryption_keys: &[Key],
        signing_keys: &[Key],
    ) -> Result<Vec<u8>, CryptoError> {
        if encryption_keys.is_empty() {
            return Err(CryptoError::NoKey("no recipients given".to_string()));
        }
        for key in encryption_keys {
            validate_key(key, true)?;
        }
        for key in signing_keys {
            validate_key(key, false)?;
        }
        let mut ctx = self.new_context(Protocol::OpenPgp)?;
        ctx.encrypt(content, encryption_keys, signing_keys)
    }

    pub fn import_key(&self, protocol: Protocol, data: &[u8]) -> Result<ImportResult, CryptoError> {
        let mut ctx = self.new_context(protocol)?;
        let result = ctx.import(data)?;
        tracing::info!(
            %protocol,
            considered = result.considered,
            imported = result.imported,
            unchanged = result.unchanged,
            "Imported keys"
        );
        Ok(result)
    }

    pub fn export_public_key(&self, key: &Key) -> Result<Vec<u8>, CryptoError> {
        let mut ctx = self.new_context(Protocol::OpenPgp)?;
        ctx.export(&key.fingerprint)
    }

    /// Look up OpenPGP keys matching `patterns`; only usable keys are returned.
    ///
    /// `remote` switches to the extern listing mode (key server lookup).
    pub fn find_keys(
        &self,
        patterns: &[String],
        secret_only: bool,
        remote: bool,
    ) -> Result<Vec<Key>, CryptoError> {
        let mode = if remote {
            KeyListMode::Extern
        } else {
            KeyListMode::Local
        };
        let mut ctx = self.context_with_mode(Protocol::OpenPgp, mode)?;
        let keys = ctx.list_keys(patterns, secret_only)?;
        let total = keys.len();
        let usable: Vec<Key> = keys.into_iter().filter(Key::is_usable).collect();
        tracing::debug!(total, usable = usable.len(), remote, "Listed keys");
        Ok(usable)
    }
}

/// Drop any plaintext that came out of a failed decryption.
fn scrub(result: &DecryptionResult, plaintext: Vec<u8>) -> Vec<u8> {
    match result.outcome {
        DecryptionOutcome::NoError | DecryptionOutcome::NotEncrypted => plaintext,
        _ => {
            if !plaintext.is_empty() {
                tracing::warn!(
                    discarded = plaintext.len(),
                    "Discarding output of failed decryption"
                );
            }
            Vec::new()
        }
    }
}

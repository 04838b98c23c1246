//! Shared helpers for integration tests: fixtures and a scripted crypto backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use mimetree::crypto::engine::{Backend, ContextOptions, EngineContext, RawDecryption, SignOutput};
use mimetree::crypto::{
    CryptoEngine, CryptoError, DecryptionOutcome, DecryptionResult, ImportResult, Key, Protocol,
    Recipient, Signature, SignatureResult, Validity, VerificationResult,
};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    VerifyDetached { signature: Vec<u8>, signed: Vec<u8> },
    VerifyOpaque,
    Decrypt { verify: bool },
    Import { protocol: Protocol, data: Vec<u8> },
}

#[derive(Default)]
struct Script {
    decryptions: Mutex<VecDeque<RawDecryption>>,
    verifications: Mutex<VecDeque<(VerificationResult, Vec<u8>)>>,
    keys: Mutex<Vec<Key>>,
    calls: Mutex<Vec<Call>>,
}

/// In-memory backend replaying queued results in call order and recording
/// every call. Clones share the same script.
#[derive(Clone, Default)]
pub struct ScriptedBackend(Arc<Script>);

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_decryption(&self, decryption: RawDecryption) -> &Self {
        self.0.decryptions.lock().unwrap().push_back(decryption);
        self
    }

    /// Queue a verification; `content` is returned by opaque verification.
    pub fn push_verification(&self, result: VerificationResult, content: &[u8]) -> &Self {
        self.0
            .verifications
            .lock()
            .unwrap()
            .push_back((result, content.to_vec()));
        self
    }

    pub fn set_keys(&self, keys: Vec<Key>) {
        *self.0.keys.lock().unwrap() = keys;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.calls.lock().unwrap().clone()
    }

    pub fn engine(&self) -> CryptoEngine {
        CryptoEngine::new(self.clone())
    }
}

struct ScriptedContext {
    script: Arc<Script>,
    protocol: Protocol,
}

impl ScriptedContext {
    fn record(&self, call: Call) {
        self.script.calls.lock().unwrap().push(call);
    }
}

impl Backend for ScriptedBackend {
    fn new_context(
        &self,
        protocol: Protocol,
        options: &ContextOptions,
    ) -> Result<Box<dyn EngineContext + '_>, CryptoError> {
        assert!(!options.auto_key_retrieve, "key retrieval must stay off");
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.0),
            protocol,
        }))
    }
}

impl EngineContext for ScriptedContext {
    fn verify_detached(
        &mut self,
        signature: &[u8],
        signed: &[u8],
    ) -> Result<VerificationResult, CryptoError> {
        self.record(Call::VerifyDetached {
            signature: signature.to_vec(),
            signed: signed.to_vec(),
        });
        let next = self.script.verifications.lock().unwrap().pop_front();
        Ok(next.map(|(v, _)| v).unwrap_or_default())
    }

    fn verify_opaque(
        &mut self,
        _: &[u8],
    ) -> Result<(VerificationResult, Vec<u8>), CryptoError> {
        self.record(Call::VerifyOpaque);
        let next = self.script.verifications.lock().unwrap().pop_front();
        Ok(next.unwrap_or_default())
    }

    fn decrypt(&mut self, _: &[u8], verify: bool) -> Result<RawDecryption, CryptoError> {
        self.record(Call::Decrypt { verify });
        self.script
            .decryptions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| CryptoError::Engine("no scripted decryption".to_string()))
    }

    fn sign(&mut self, _: &[u8], _: &[Key]) -> Result<SignOutput, CryptoError> {
        Ok(SignOutput {
            signature: b"-----BEGIN PGP SIGNATURE-----".to_vec(),
            hash_algorithm: "SHA256".to_string(),
        })
    }

    fn encrypt(&mut self, content: &[u8], _: &[Key], _: &[Key]) -> Result<Vec<u8>, CryptoError> {
        Ok(content.to_vec())
    }

    fn list_keys(&mut self, _: &[String], secret_only: bool) -> Result<Vec<Key>, CryptoError> {
        let keys = self.script.keys.lock().unwrap().clone();
        Ok(keys
            .into_iter()
            .filter(|k| !secret_only || k.has_secret)
            .collect())
    }

    fn import(&mut self, data: &[u8]) -> Result<ImportResult, CryptoError> {
        self.record(Call::Import {
            protocol: self.protocol,
            data: data.to_vec(),
        });
        Ok(ImportResult {
            considered: 1,
            imported: 1,
            unchanged: 0,
        })
    }

    fn export(&mut self, _: &str) -> Result<Vec<u8>, CryptoError> {
        Ok(Vec::new())
    }
}

pub const FINGERPRINT: &str = "1BA323932B3FAA826132C79E8D9860C58F246DE6";
pub const KEY_ID: &str = "8D9860C58F246DE6";

pub fn signature(result: SignatureResult) -> Signature {
    Signature {
        fingerprint: FINGERPRINT.to_string(),
        key_id: KEY_ID.to_string(),
        creation_time: Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).single(),
        trust_level: Validity::Ultimate,
        result,
        key_revoked: false,
        sig_expired: false,
        signer_name: "Unit Test".to_string(),
        signer_emails: vec!["<test@kolab.org>".to_string()],
    }
}

pub fn verification(result: SignatureResult) -> VerificationResult {
    VerificationResult {
        signatures: vec![signature(result)],
        error: None,
    }
}

pub fn decrypted(plaintext: &str) -> RawDecryption {
    RawDecryption {
        result: DecryptionResult {
            recipients: vec![Recipient {
                key_id: KEY_ID.to_string(),
                secret_key_available: true,
            }],
            error: None,
            outcome: DecryptionOutcome::NoError,
        },
        verification: VerificationResult::default(),
        plaintext: plaintext.as_bytes().to_vec(),
    }
}

pub fn no_secret_key() -> RawDecryption {
    RawDecryption {
        result: DecryptionResult {
            recipients: vec![Recipient {
                key_id: KEY_ID.to_string(),
                secret_key_available: false,
            }],
            error: Some("No secret key".to_string()),
            outcome: DecryptionOutcome::NoSecretKeyError,
        },
        verification: VerificationResult::default(),
        plaintext: b"leaked partial output".to_vec(),
    }
}

//! Decryption and signature verification over a finished part tree.
//!
//! Decryption runs first over every encrypted part, then verification over
//! every signed part, since decrypted payloads can contain signed parts
//! that only exist after the first pass. Both walks are in document order
//! and reach parts created while walking.

use std::sync::Arc;

use crate::crypto::engine::CryptoEngine;
use crate::crypto::{DecryptionOutcome, Signature, SignatureResult, VerificationResult};
use crate::model::metadata::{PartError, PartMetaData};
use crate::model::node::Node;
use crate::model::part::{Part, PartId, PartKind, PartTree, SignedData};
use crate::parser::armor::clear_signed_text;
use crate::parser::header::{decode_charset, strip_angle_brackets};
use crate::parser::mime::{crlf_to_lf, lf_to_crlf};
use crate::parser::tree::ObjectTreeParser;

/// Error text recorded when none of the recipients has a secret key here.
pub const NO_KEY_TEXT: &str = "Could not decrypt the data: no key found for recipients.";

/// Runs the crypto passes of one message.
pub struct DecryptVerify<'a> {
    engine: &'a CryptoEngine,
    parser: &'a ObjectTreeParser,
}

impl<'a> DecryptVerify<'a> {
    pub fn new(engine: &'a CryptoEngine, parser: &'a ObjectTreeParser) -> Self {
        Self { engine, parser }
    }

    /// Decrypt everything, then verify everything.
    pub fn run(&self, tree: &mut PartTree) {
        let decrypted = self.decrypt_all(tree);
        let verified = self.verify_all(tree);
        tracing::debug!(decrypted, verified, "Crypto passes finished");
    }

    /// Decrypt every encrypted part below the root. Returns how many were attempted.
    pub fn decrypt_all(&self, tree: &mut PartTree) -> usize {
        let mut count = 0;
        walk(tree, |tree, id| {
            if matches!(tree.get(id).kind(), PartKind::Encrypted(_)) {
                self.start_decryption(tree, id);
                count += 1;
            }
        });
        count
    }

    /// Verify every signed part below the root that still has signed data.
    pub fn verify_all(&self, tree: &mut PartTree) -> usize {
        let mut count = 0;
        walk(tree, |tree, id| {
            if let PartKind::Signed(SignedData {
                signed_data: Some(_),
                ..
            }) = tree.get(id).kind()
            {
                self.start_verification(tree, id);
                count += 1;
            }
        });
        count
    }

    /// Decrypt one encrypted part and, unless the plaintext was handed to a
    /// signed child, parse the plaintext below it.
    pub fn start_decryption(&self, tree: &mut PartTree, id: PartId) {
        let (ciphertext, parse_after) = match tree.get(id).kind() {
            PartKind::Encrypted(data) => (
                data.ciphertext.clone().or_else(|| tree.get(id).node().cloned()),
                data.parse_after,
            ),
            _ => return,
        };
        let Some(ciphertext) = ciphertext else {
            tracing::warn!(part = id.index(), "Encrypted part without ciphertext");
            return;
        };

        tree.get_mut(id).metadata_mut().is_encrypted = true;
        let decryptable = self.decrypt(tree, id, &ciphertext);

        let part = tree.get_mut(id);
        part.metadata_mut().is_decryptable = decryptable;
        if parse_after && !part.metadata().is_signed {
            let plaintext = match part.kind() {
                PartKind::Encrypted(data) => data.decrypted.clone(),
                _ => Vec::new(),
            };
            let charset = payload_charset(&ciphertext);
            self.parser.parse_data_into(tree, id, &plaintext, charset);
        }
    }

    fn decrypt(&self, tree: &mut PartTree, id: PartId, ciphertext: &Arc<Node>) -> bool {
        let protocol = match tree.get(id).kind() {
            PartKind::Encrypted(data) => data.protocol,
            _ => return false,
        };
        {
            let part = tree.get_mut(id);
            part.set_error(PartError::NoError);
            part.metadata_mut().error_text.clear();
        }

        let (result, verification, plaintext) =
            match self.engine.decrypt_and_verify(protocol, ciphertext.decoded_content()) {
                Ok(out) => out,
                Err(err) => {
                    tracing::warn!(%protocol, error = %err, "Decryption call failed");
                    let part = tree.get_mut(id);
                    part.set_error(PartError::UnknownError);
                    let meta = part.metadata_mut();
                    meta.error_text = format!("Could not decrypt the data. Error: {err}");
                    meta.decryption_error = err.to_string();
                    meta.technical_problem = true;
                    part.set_text(String::new());
                    return false;
                }
            };

        // Signatures over a payload that failed to decrypt vouch for nothing.
        let only_signed = result.outcome == DecryptionOutcome::NotEncrypted;
        let signed = (result.is_ok() || only_signed) && !verification.signatures.is_empty();
        if !verification.signatures.is_empty() && !signed {
            tracing::warn!(%protocol, outcome = ?result.outcome, "Ignoring signatures of failed decryption");
        }
        tree.get_mut(id).metadata_mut().is_signed = signed;

        let plaintext = crlf_to_lf(&plaintext);
        let charset = payload_charset(ciphertext);
        let decoded = decode_charset(charset, &plaintext);

        if signed {
            // The signature came with the plaintext; record it on a signed
            // child instead of verifying again.
            let node = tree.get(id).node().cloned();
            let child = Part::new(
                PartKind::Signed(SignedData {
                    protocol,
                    signed_data: None,
                    parse_after: true,
                }),
                node,
            )
            .with_text(decoded.clone());
            let child = tree.push_child(id, child);
            self.apply_verification(tree, child, &verification, &plaintext, charset);
        }

        if only_signed && signed {
            tracing::info!(%protocol, "Payload is only signed");
            let part = tree.get_mut(id);
            part.metadata_mut().is_encrypted = false;
            set_decrypted(part, plaintext);
            return true;
        }

        let key_id = result
            .recipients
            .iter()
            .find(|r| r.secret_key_available)
            .map(|r| r.key_id.clone())
            .unwrap_or_default();
        let part = tree.get_mut(id);
        if part.metadata().is_encrypted {
            part.metadata_mut().key_id = key_id;
        }

        if result.is_ok() {
            set_decrypted(part, plaintext);
            part.set_text(decoded);
            part.metadata_mut().status = "Decrypted.".to_string();
            tracing::info!(%protocol, "Decryption succeeded");
            return true;
        }

        let message = result.error.clone().unwrap_or_default();
        tracing::warn!(%protocol, outcome = ?result.outcome, error = %message, "Failed to decrypt");
        let meta = part.metadata_mut();
        meta.is_encrypted = result.outcome != DecryptionOutcome::NotEncrypted;
        meta.decryption_error = message.clone();
        let error = if meta.key_id.is_empty() {
            meta.error_text = NO_KEY_TEXT.to_string();
            PartError::NoKeyError
        } else {
            // With a usable key the only way to fail is the passphrase.
            meta.error_text = message;
            PartError::PassphraseError
        };
        meta.status = error.description().to_string();
        part.set_error(error);
        set_decrypted(part, Vec::new());
        part.set_text(String::new());
        false
    }

    /// Verify one signed part (detached when it has a signature node,
    /// opaque otherwise) and parse the signed content below it.
    pub fn start_verification(&self, tree: &mut PartTree, id: PartId) {
        let (protocol, signed_data, parse_after) = match tree.get(id).kind() {
            PartKind::Signed(SignedData {
                protocol,
                signed_data: Some(data),
                parse_after,
            }) => (*protocol, Arc::clone(data), *parse_after),
            _ => return,
        };

        {
            let meta = tree.get_mut(id).metadata_mut();
            meta.is_signed = false;
            meta.is_encrypted = false;
            meta.is_decryptable = false;
        }

        let charset = payload_charset(&signed_data);
        let signature = tree.get(id).node().cloned();
        let outcome = match &signature {
            Some(signature) => {
                // The loader normalises line endings; signatures are over CRLF.
                let signed = lf_to_crlf(signed_data.encoded_content());
                self.engine
                    .verify_detached(protocol, signature.decoded_content(), &signed)
                    .map(|result| (result, signed))
            }
            None => self
                .engine
                .verify_opaque(protocol, signed_data.decoded_content()),
        };
        let (verification, mut signed) = match outcome {
            Ok(out) => out,
            Err(err) => {
                tracing::warn!(%protocol, error = %err, "Verification call failed");
                let meta = tree.get_mut(id).metadata_mut();
                meta.technical_problem = true;
                meta.error_text = err.to_string();
                meta.status = "Signature could not be verified.".to_string();
                let fallback = if signature.is_some() {
                    lf_to_crlf(signed_data.encoded_content())
                } else {
                    Vec::new()
                };
                (VerificationResult::default(), fallback)
            }
        };
        if signed.is_empty() && signature.is_none() {
            if let Some(text) = clear_signed_text(signed_data.decoded_content()) {
                signed = text;
            }
        }

        tree.get_mut(id)
            .set_text(decode_charset(charset, &crlf_to_lf(&signed)));
        self.apply_verification(tree, id, &verification, &signed, charset);

        // Signed content renders whatever the verdict; only the metadata
        // tells the reader whether to trust it.
        let part = tree.get(id);
        if !part.metadata().is_signed && parse_after && !signed.is_empty() {
            self.parser.parse_data_into(tree, id, &signed, charset);
        }

        let meta = tree.get_mut(id).metadata_mut();
        if !meta.is_signed {
            meta.creation_time = None;
            if !meta.technical_problem {
                meta.status = "No signature found.".to_string();
            }
        }
    }

    fn apply_verification(
        &self,
        tree: &mut PartTree,
        id: PartId,
        verification: &VerificationResult,
        signed: &[u8],
        charset: &str,
    ) {
        let Some(first) = verification.signatures.first() else {
            return;
        };
        let parse_after = match tree.get(id).kind() {
            PartKind::Signed(data) => data.parse_after,
            _ => false,
        };
        let meta = tree.get_mut(id).metadata_mut();
        meta.is_signed = true;
        signature_to_metadata(meta, first);
        tracing::info!(
            good = meta.is_good_signature,
            key_id = %meta.key_id,
            trusted = meta.key_is_trusted,
            "Verified signature"
        );
        if parse_after && !signed.is_empty() {
            self.parser.parse_data_into(tree, id, signed, charset);
        }
    }
}

/// Parse the signed content of every signed part without verifying it.
///
/// Used when crypto is switched off. Inline clear-signed blocks show their
/// cleartext; other opaque signatures need the engine to recover their
/// content and stay empty.
pub fn reveal_unverified(parser: &ObjectTreeParser, tree: &mut PartTree) {
    walk(tree, |tree, id| {
        let (signed_data, parse_after) = match tree.get(id).kind() {
            PartKind::Signed(SignedData {
                signed_data: Some(data),
                parse_after,
                ..
            }) => (Arc::clone(data), *parse_after),
            _ => return,
        };
        if !tree.get(id).children.is_empty() {
            return;
        }
        let charset = payload_charset(&signed_data);
        if tree.get(id).node().is_none() {
            let Some(text) = clear_signed_text(signed_data.decoded_content()) else {
                return;
            };
            let part = tree.get_mut(id);
            part.metadata_mut().is_signed = false;
            part.metadata_mut().status = "Signature not verified.".to_string();
            part.set_text(decode_charset(charset, &crlf_to_lf(&text)));
            return;
        }
        if !parse_after {
            return;
        }
        let part = tree.get_mut(id);
        part.metadata_mut().is_signed = false;
        part.metadata_mut().status = "Signature not verified.".to_string();
        parser.parse_data_into(tree, id, signed_data.encoded_content(), charset);
    });
}

/// Fill signature metadata from one engine signature.
pub fn signature_to_metadata(meta: &mut PartMetaData, signature: &Signature) {
    meta.is_good_signature = signature.is_good();
    if !meta.is_good_signature {
        if signature.result == SignatureResult::KeyNotFound {
            tracing::warn!(fingerprint = %signature.fingerprint, "No public key to verify signature");
        } else {
            tracing::warn!(result = ?signature.result, "Signature is not good");
        }
    }

    meta.key_missing = signature.result == SignatureResult::KeyNotFound;
    meta.key_expired = signature.result == SignatureResult::Expired;
    meta.key_revoked = signature.key_revoked;
    meta.sig_expired = signature.sig_expired;

    meta.key_id = if signature.key_id.is_empty() {
        signature.fingerprint.clone()
    } else {
        signature.key_id.clone()
    };
    meta.key_is_trusted = signature.trust_level.is_trusted();

    meta.signer_mail_addresses = signature
        .signer_emails
        .iter()
        .map(|e| strip_angle_brackets(e))
        .filter(|e| !e.is_empty())
        .collect();
    meta.signer = match (
        signature.signer_name.trim(),
        meta.signer_mail_addresses.first(),
    ) {
        ("", Some(email)) => email.clone(),
        (name, Some(email)) => format!("{name} <{email}>"),
        (name, None) => name.to_string(),
    };
    meta.creation_time = signature.creation_time;
    meta.status = match signature.result {
        SignatureResult::Ok => "Good signature.",
        SignatureResult::Expired => "Signature by an expired key.",
        SignatureResult::KeyNotFound => "No public key to verify the signature.",
        SignatureResult::Invalid => "Bad signature.",
    }
    .to_string();
}

fn set_decrypted(part: &mut Part, plaintext: Vec<u8>) {
    if let PartKind::Encrypted(data) = part.kind_mut() {
        data.decrypted = plaintext;
    }
}

/// Charset used to decode crypto payloads. `us-ascii` (the MIME default)
/// is widened to UTF-8 so undeclared 8-bit plaintext survives.
fn payload_charset(node: &Node) -> &str {
    let charset = node.charset();
    if charset.eq_ignore_ascii_case("us-ascii") {
        "utf-8"
    } else {
        charset
    }
}

/// Pre-order walk from the root that picks up children added by `visit`.
fn walk(tree: &mut PartTree, mut visit: impl FnMut(&mut PartTree, PartId)) {
    let mut stack = vec![tree.root()];
    while let Some(id) = stack.pop() {
        visit(tree, id);
        stack.extend(tree.get(id).children.iter().rev().copied());
    }
}

//! Parsers for the engine's machine-readable output: `[GNUPG:]` status
//! lines (written to the status file descriptor) and `--with-colons` key
//! listings.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use super::{
    DecryptionOutcome, DecryptionResult, ImportResult, Key, Recipient, Signature,
    SignatureResult, UserId, Validity, VerificationResult,
};

const STATUS_PREFIX: &str = "[GNUPG:] ";

/// One status line: `[GNUPG:] KEYWORD arg arg…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub keyword: String,
    pub args: Vec<String>,
}

impl StatusLine {
    fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Arguments from `index` on, joined by single spaces (user ids contain spaces).
    fn rest(&self, index: usize) -> String {
        self.args.get(index..).map(|a| a.join(" ")).unwrap_or_default()
    }
}

/// Extract status lines from the engine's status output.
///
/// Anything not carrying the status prefix (human-readable diagnostics on
/// the same stream) is ignored.
pub fn parse_status_lines(output: &[u8]) -> Vec<StatusLine> {
    String::from_utf8_lossy(output)
        .lines()
        .filter_map(|line| line.strip_prefix(STATUS_PREFIX))
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let keyword = words.next()?.to_string();
            Some(StatusLine {
                keyword,
                args: words.map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Human-readable diagnostics (everything that is not a status line).
pub fn diagnostics(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| !line.starts_with(STATUS_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Verification ────────────────────────────────────────────────

struct PendingSignature {
    sig: Signature,
    has_verdict: bool,
}

impl PendingSignature {
    fn new() -> Self {
        Self {
            sig: Signature {
                fingerprint: String::new(),
                key_id: String::new(),
                creation_time: None,
                trust_level: Validity::Unknown,
                result: SignatureResult::Invalid,
                key_revoked: false,
                sig_expired: false,
                signer_name: String::new(),
                signer_emails: Vec::new(),
            },
            has_verdict: false,
        }
    }
}

/// Collect the signatures described by a run of status lines.
pub fn verification_from_status(lines: &[StatusLine]) -> VerificationResult {
    let mut done: Vec<Signature> = Vec::new();
    let mut current: Option<PendingSignature> = None;

    let flush = |current: &mut Option<PendingSignature>, done: &mut Vec<Signature>| {
        if let Some(p) = current.take() {
            if p.has_verdict {
                done.push(p.sig);
            }
        }
    };

    for line in lines {
        match line.keyword.as_str() {
            "NEWSIG" => {
                flush(&mut current, &mut done);
                current = Some(PendingSignature::new());
            }
            kw @ ("GOODSIG" | "EXPSIG" | "EXPKEYSIG" | "REVKEYSIG" | "BADSIG" | "ERRSIG") => {
                if current.as_ref().is_some_and(|p| p.has_verdict) {
                    flush(&mut current, &mut done);
                }
                let pending = current.get_or_insert_with(PendingSignature::new);
                pending.has_verdict = true;
                apply_verdict(&mut pending.sig, kw, line);
            }
            "NO_PUBKEY" => {
                if let Some(p) = current.as_mut() {
                    p.sig.result = SignatureResult::KeyNotFound;
                }
            }
            "VALIDSIG" => {
                if let Some(p) = current.as_mut() {
                    // Prefer the primary key fingerprint (field 10) over the signing subkey
                    let fpr = line.arg(9).or_else(|| line.arg(0)).unwrap_or_default();
                    p.sig.fingerprint = fpr.to_string();
                    if let Some(ts) = line.arg(2) {
                        p.sig.creation_time = parse_timestamp(ts);
                    }
                }
            }
            kw if kw.starts_with("TRUST_") => {
                if let Some(p) = current.as_mut() {
                    p.sig.trust_level = match kw {
                        "TRUST_UNDEFINED" => Validity::Undefined,
                        "TRUST_NEVER" => Validity::Never,
                        "TRUST_MARGINAL" => Validity::Marginal,
                        "TRUST_FULLY" => Validity::Full,
                        "TRUST_ULTIMATE" => Validity::Ultimate,
                        _ => Validity::Unknown,
                    };
                }
            }
            _ => {}
        }
    }
    flush(&mut current, &mut done);

    VerificationResult {
        signatures: done,
        error: None,
    }
}

fn apply_verdict(sig: &mut Signature, keyword: &str, line: &StatusLine) {
    sig.key_id = line.arg(0).unwrap_or_default().to_string();
    if sig.fingerprint.is_empty() {
        sig.fingerprint = sig.key_id.clone();
    }

    if keyword == "ERRSIG" {
        // ERRSIG <keyid> <pkalgo> <hashalgo> <sig_class> <time> <rc> [<fpr>]
        sig.result = if line.arg(5) == Some("9") {
            SignatureResult::KeyNotFound
        } else {
            SignatureResult::Invalid
        };
        if let Some(fpr) = line.arg(6).filter(|f| !f.is_empty() && *f != "-") {
            sig.fingerprint = fpr.to_string();
        }
        if let Some(ts) = line.arg(4) {
            sig.creation_time = parse_timestamp(ts);
        }
        return;
    }

    let uid = UserId::parse(&line.rest(1));
    sig.signer_name = if uid.name.is_empty() {
        uid.id.clone()
    } else {
        uid.name.clone()
    };
    if !uid.email.is_empty() && !sig.signer_emails.contains(&uid.email) {
        sig.signer_emails.push(uid.email);
    }

    sig.result = match keyword {
        "GOODSIG" => SignatureResult::Ok,
        "EXPKEYSIG" => SignatureResult::Expired,
        "EXPSIG" => {
            sig.sig_expired = true;
            SignatureResult::Invalid
        }
        "REVKEYSIG" => {
            sig.key_revoked = true;
            SignatureResult::Invalid
        }
        _ => SignatureResult::Invalid,
    };
}

/// Parse a status timestamp: seconds since the epoch or ISO `YYYYMMDDTHHMMSS`.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = value.parse::<i64>() {
        if secs <= 0 {
            return None;
        }
        return Utc.timestamp_opt(secs, 0).single();
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

// ── Decryption ──────────────────────────────────────────────────

/// Classify a decrypt call from its status lines.
pub fn decryption_from_status(lines: &[StatusLine]) -> DecryptionResult {
    let mut recipients: Vec<Recipient> = Vec::new();
    let mut began = false;
    let mut okay = false;
    let mut failed = false;
    let mut passphrase = false;
    let mut no_data = false;

    for line in lines {
        match line.keyword.as_str() {
            "BEGIN_DECRYPTION" => began = true,
            "ENC_TO" => {
                began = true;
                let key_id = line.arg(0).unwrap_or_default().to_string();
                if !recipients.iter().any(|r| r.key_id == key_id) {
                    recipients.push(Recipient {
                        key_id,
                        secret_key_available: true,
                    });
                }
            }
            "NO_SECKEY" => {
                let key_id = line.arg(0).unwrap_or_default();
                match recipients.iter_mut().find(|r| r.key_id == key_id) {
                    Some(r) => r.secret_key_available = false,
                    None => recipients.push(Recipient {
                        key_id: key_id.to_string(),
                        secret_key_available: false,
                    }),
                }
            }
            "DECRYPTION_OKAY" => okay = true,
            "DECRYPTION_FAILED" => failed = true,
            "BAD_PASSPHRASE" | "MISSING_PASSPHRASE" => passphrase = true,
            "ERROR" | "FAILURE" => {
                // Error code 99 / GPG_ERR_CANCELED in the low 16 bits: pinentry cancelled
                if let Some(code) = line.arg(1).and_then(|c| c.parse::<u32>().ok()) {
                    if code & 0xFFFF == 99 {
                        passphrase = true;
                    }
                }
            }
            "NODATA" => no_data = true,
            _ => {}
        }
    }

    if okay && !failed {
        return DecryptionResult {
            recipients,
            error: None,
            outcome: DecryptionOutcome::NoError,
        };
    }

    let (outcome, message) = if !began && !failed {
        let message = if no_data {
            "No encrypted data found"
        } else {
            "Data is not encrypted"
        };
        (DecryptionOutcome::NotEncrypted, message)
    } else if passphrase {
        (DecryptionOutcome::PassphraseError, "Bad passphrase")
    } else if !recipients.is_empty() && recipients.iter().all(|r| !r.secret_key_available) {
        (DecryptionOutcome::NoSecretKeyError, "No secret key")
    } else {
        (DecryptionOutcome::DecryptionError, "Decryption failed")
    };

    DecryptionResult {
        recipients,
        error: Some(message.to_string()),
        outcome,
    }
}

// ── Signing, encryption, import ─────────────────────────────────

/// Digest algorithm name from a `SIG_CREATED` line.
pub fn sig_created_hash(lines: &[StatusLine]) -> Option<String> {
    lines
        .iter()
        .find(|l| l.keyword == "SIG_CREATED")
        .and_then(|l| l.arg(2))
        .map(|id| hash_algorithm_name(id).to_string())
}

/// OpenPGP hash algorithm ids (RFC 4880 §9.4).
fn hash_algorithm_name(id: &str) -> &'static str {
    match id {
        "1" => "MD5",
        "2" => "SHA1",
        "3" => "RIPEMD160",
        "8" => "SHA256",
        "9" => "SHA384",
        "10" => "SHA512",
        "11" => "SHA224",
        _ => "UNKNOWN",
    }
}

/// First invalid recipient or signer reported, if any.
pub fn invalid_key(lines: &[StatusLine]) -> Option<String> {
    lines
        .iter()
        .find(|l| l.keyword == "INV_RECP" || l.keyword == "INV_SGNR")
        .map(|l| l.rest(1))
}

/// Counters from an `IMPORT_RES` line.
pub fn import_from_status(lines: &[StatusLine]) -> ImportResult {
    let Some(line) = lines.iter().find(|l| l.keyword == "IMPORT_RES") else {
        return ImportResult::default();
    };
    let num = |i: usize| line.arg(i).and_then(|v| v.parse().ok()).unwrap_or(0);
    ImportResult {
        considered: num(0),
        imported: num(2),
        unchanged: num(4),
    }
}

// ── Key listings ────────────────────────────────────────────────

/// Parse a `--with-colons` key listing (OpenPGP keys or X.509 certificates).
pub fn parse_colon_listing(output: &str) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut current: Option<Key> = None;

    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        match field(0) {
            record @ ("pub" | "sec" | "crt" | "crs") => {
                if let Some(key) = current.take() {
                    keys.push(key);
                }
                let validity = field(1);
                let caps = field(11);
                let key_id = field(4).to_string();
                current = Some(Key {
                    short_key_id: Key::short_id(&key_id),
                    key_id,
                    fingerprint: String::new(),
                    user_ids: Vec::new(),
                    revoked: validity.contains('r'),
                    expired: validity.contains('e'),
                    invalid: validity.contains('i'),
                    disabled: caps.contains('D'),
                    can_encrypt: caps.contains('E'),
                    can_sign: caps.contains('S'),
                    has_secret: record == "sec" || record == "crs",
                });
            }
            "fpr" => {
                if let Some(key) = current.as_mut() {
                    if key.fingerprint.is_empty() {
                        key.fingerprint = field(9).to_string();
                    }
                }
            }
            "uid" => {
                if let Some(key) = current.as_mut() {
                    let raw = unescape_colon_field(field(9));
                    if !raw.is_empty() {
                        key.user_ids.push(UserId::parse(&raw));
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(key) = current {
        keys.push(key);
    }
    keys
}

/// Undo the `\xHH` escaping used in colon listings.
fn unescape_colon_field(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'x') && i + 3 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 2..i + 4]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(text: &str) -> Vec<StatusLine> {
        parse_status_lines(text.as_bytes())
    }

    #[test]
    fn test_parse_status_lines_ignores_diagnostics() {
        let lines = status(
            "gpg: Signature made Thu\n[GNUPG:] NEWSIG\n[GNUPG:] GOODSIG 8D9860C58F246DE6 Unit Test <test@kolab.org>\n",
        );
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].keyword, "GOODSIG");
        assert_eq!(lines[1].args.len(), 4);
        assert_eq!(diagnostics(b"gpg: hi\n[GNUPG:] NEWSIG\n"), "gpg: hi");
    }

    #[test]
    fn test_good_signature() {
        let lines = status(
            "[GNUPG:] NEWSIG\n\
             [GNUPG:] GOODSIG 8D9860C58F246DE6 Unit Test <test@kolab.org>\n\
             [GNUPG:] VALIDSIG 1BA323932B3FAA826132C79E8D9860C58F246DE6 2018-01-01 1514764800 0 4 0 1 8 00 1BA323932B3FAA826132C79E8D9860C58F246DE6\n\
             [GNUPG:] TRUST_ULTIMATE 0 tofu+pgp\n",
        );
        let result = verification_from_status(&lines);
        assert_eq!(result.signatures.len(), 1);
        let sig = &result.signatures[0];
        assert!(sig.is_good());
        assert_eq!(sig.key_id, "8D9860C58F246DE6");
        assert_eq!(sig.fingerprint, "1BA323932B3FAA826132C79E8D9860C58F246DE6");
        assert_eq!(sig.trust_level, Validity::Ultimate);
        assert_eq!(sig.signer_name, "Unit Test");
        assert_eq!(sig.signer_emails, vec!["test@kolab.org".to_string()]);
        assert_eq!(
            sig.creation_time.map(|t| t.timestamp()),
            Some(1_514_764_800)
        );
    }

    #[test]
    fn test_missing_key_and_bad_signature() {
        let lines = status(
            "[GNUPG:] NEWSIG\n\
             [GNUPG:] ERRSIG 0123456789ABCDEF 1 8 00 1514764800 9 -\n\
             [GNUPG:] NO_PUBKEY 0123456789ABCDEF\n\
             [GNUPG:] NEWSIG\n\
             [GNUPG:] BADSIG 8D9860C58F246DE6 Unit Test <test@kolab.org>\n",
        );
        let result = verification_from_status(&lines);
        assert_eq!(result.signatures.len(), 2);
        assert_eq!(result.signatures[0].result, SignatureResult::KeyNotFound);
        assert_eq!(result.signatures[0].fingerprint, "0123456789ABCDEF");
        assert_eq!(result.signatures[1].result, SignatureResult::Invalid);
    }

    #[test]
    fn test_expired_and_revoked_keys() {
        let lines = status(
            "[GNUPG:] EXPKEYSIG AAAAAAAAAAAAAAAA Old <old@example.com>\n\
             [GNUPG:] REVKEYSIG BBBBBBBBBBBBBBBB Gone <gone@example.com>\n",
        );
        let result = verification_from_status(&lines);
        assert_eq!(result.signatures.len(), 2);
        assert_eq!(result.signatures[0].result, SignatureResult::Expired);
        assert!(result.signatures[1].key_revoked);
        assert_eq!(result.signatures[1].result, SignatureResult::Invalid);
    }

    #[test]
    fn test_decryption_outcomes() {
        let ok = decryption_from_status(&status(
            "[GNUPG:] ENC_TO 8D9860C58F246DE6 1 0\n[GNUPG:] BEGIN_DECRYPTION\n[GNUPG:] DECRYPTION_OKAY\n[GNUPG:] END_DECRYPTION\n",
        ));
        assert!(ok.is_ok());
        assert_eq!(ok.recipients.len(), 1);
        assert!(ok.recipients[0].secret_key_available);

        let no_key = decryption_from_status(&status(
            "[GNUPG:] ENC_TO 0123456789ABCDEF 1 0\n[GNUPG:] NO_SECKEY 0123456789ABCDEF\n[GNUPG:] BEGIN_DECRYPTION\n[GNUPG:] DECRYPTION_FAILED\n",
        ));
        assert_eq!(no_key.outcome, DecryptionOutcome::NoSecretKeyError);
        assert!(!no_key.recipients[0].secret_key_available);

        let cancelled = decryption_from_status(&status(
            "[GNUPG:] ENC_TO 8D9860C58F246DE6 1 0\n[GNUPG:] ERROR pkdecrypt_failed 83886179\n[GNUPG:] BEGIN_DECRYPTION\n[GNUPG:] DECRYPTION_FAILED\n",
        ));
        assert_eq!(cancelled.outcome, DecryptionOutcome::PassphraseError);

        let plain = decryption_from_status(&status("[GNUPG:] NODATA 1\n"));
        assert_eq!(plain.outcome, DecryptionOutcome::NotEncrypted);

        let signed_only = decryption_from_status(&status(
            "[GNUPG:] NEWSIG\n[GNUPG:] GOODSIG 8D9860C58F246DE6 Unit Test <test@kolab.org>\n",
        ));
        assert_eq!(signed_only.outcome, DecryptionOutcome::NotEncrypted);

        let broken = decryption_from_status(&status(
            "[GNUPG:] ENC_TO 8D9860C58F246DE6 1 0\n[GNUPG:] BEGIN_DECRYPTION\n[GNUPG:] DECRYPTION_FAILED\n",
        ));
        assert_eq!(broken.outcome, DecryptionOutcome::DecryptionError);
    }

    #[test]
    fn test_sig_created_and_import() {
        let lines = status(
            "[GNUPG:] SIG_CREATED D 1 8 00 1514764800 1BA323932B3FAA826132C79E8D9860C58F246DE6\n\
             [GNUPG:] IMPORT_RES 3 0 1 0 2 0 0 0 0 0 0 0 0 0 0\n",
        );
        assert_eq!(sig_created_hash(&lines).as_deref(), Some("SHA256"));
        let imported = import_from_status(&lines);
        assert_eq!(
            imported,
            ImportResult {
                considered: 3,
                imported: 1,
                unchanged: 2
            }
        );
    }

    #[test]
    fn test_colon_listing() {
        let listing = "\
tru::1:1514764800:0:3:1:5
pub:u:2048:1:8D9860C58F246DE6:1514764800:::u:::scESC::::::23::0:
fpr:::::::::1BA323932B3FAA826132C79E8D9860C58F246DE6:
uid:u::::1514764800::ABCDEF::Unit Test <test@kolab.org>::::::::::0:
sub:u:2048:1:AAAAAAAAAAAAAAAA:1514764800::::::e::::::23:
fpr:::::::::0000000000000000000000000000AAAAAAAAAAAAAAAA:
pub:r:2048:1:0123456789ABCDEF:1514764800:::-:::sc::::::23::0:
fpr:::::::::FFFFFFFFFFFFFFFFFFFFFFFF0123456789ABCDEF:
uid:r::::1514764800::ABCDEF::Colon\\x3a Name <colon@example.com>::::::::::0:
";
        let keys = parse_colon_listing(listing);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key_id, "8D9860C58F246DE6");
        assert_eq!(keys[0].short_key_id, "8F246DE6");
        assert_eq!(keys[0].fingerprint, "1BA323932B3FAA826132C79E8D9860C58F246DE6");
        assert!(keys[0].can_encrypt && keys[0].is_usable());
        assert_eq!(keys[0].user_ids[0].email, "test@kolab.org");
        assert!(keys[1].revoked);
        assert!(!keys[1].can_encrypt);
        assert_eq!(keys[1].user_ids[0].name, "Colon: Name");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("1514764800").is_some());
        assert!(parse_timestamp("20180101T000000").is_some());
        assert!(parse_timestamp("0").is_none());
        assert!(parse_timestamp("garbage").is_none());
    }

    #[test]
    fn test_unescape_colon_field_with_multibyte_after_escape() {
        assert_eq!(unescape_colon_field("a\\x3ab"), "a:b");
        assert_eq!(unescape_colon_field("\\x1é"), "\\x1é");
        assert_eq!(unescape_colon_field("tail\\x4"), "tail\\x4");
    }
}

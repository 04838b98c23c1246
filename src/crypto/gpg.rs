//! Subprocess backend driving `gpg` (OpenPGP) and `gpgsm` (CMS).
//!
//! Every operation runs one engine process with `--batch --status-fd 2`
//! and interprets the status lines it writes. The process is killed if the
//! context is dropped while it is still running.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;

use crate::config::CryptoConfig;

use super::engine::{Backend, ContextOptions, EngineContext, KeyListMode, RawDecryption, SignOutput};
use super::status::{self, StatusLine};
use super::{
    CryptoError, DecryptionOutcome, ImportResult, Key, Protocol, VerificationResult,
};

/// Backend running the GnuPG binaries.
pub struct GpgBackend {
    gpg: PathBuf,
    gpgsm: PathBuf,
    homedir: Option<PathBuf>,
    gpg_available: OnceLock<bool>,
    gpgsm_available: OnceLock<bool>,
}

impl GpgBackend {
    pub fn new(gpg: impl Into<PathBuf>, gpgsm: impl Into<PathBuf>) -> Self {
        Self {
            gpg: gpg.into(),
            gpgsm: gpgsm.into(),
            homedir: None,
            gpg_available: OnceLock::new(),
            gpgsm_available: OnceLock::new(),
        }
    }

    pub fn from_config(config: &CryptoConfig) -> Self {
        let mut backend = Self::new(&config.gpg_path, &config.gpgsm_path);
        backend.homedir = config.homedir.clone();
        backend
    }

    /// Use `dir` as the engine home directory instead of the default.
    pub fn with_homedir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.homedir = Some(dir.into());
        self
    }

    fn binary(&self, protocol: Protocol) -> &Path {
        match protocol {
            Protocol::OpenPgp => &self.gpg,
            Protocol::Cms => &self.gpgsm,
        }
    }

    /// Whether the binary for `protocol` runs. Probed once per backend.
    pub fn is_available(&self, protocol: Protocol) -> bool {
        let cell = match protocol {
            Protocol::OpenPgp => &self.gpg_available,
            Protocol::Cms => &self.gpgsm_available,
        };
        *cell.get_or_init(|| {
            let binary = self.binary(protocol);
            let ok = Command::new(binary)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            tracing::debug!(binary = %binary.display(), available = ok, "Probed crypto engine");
            ok
        })
    }
}

impl Backend for GpgBackend {
    fn new_context(
        &self,
        protocol: Protocol,
        options: &ContextOptions,
    ) -> Result<Box<dyn EngineContext + '_>, CryptoError> {
        if !self.is_available(protocol) {
            return Err(CryptoError::Engine(format!(
                "{protocol} backend not available ({})",
                self.binary(protocol).display()
            )));
        }
        Ok(Box::new(GpgContext {
            backend: self,
            protocol,
            options: options.clone(),
        }))
    }
}

/// Output of one engine run.
struct RunOutput {
    stdout: Vec<u8>,
    status: Vec<StatusLine>,
    diagnostics: String,
    success: bool,
}

impl RunOutput {
    fn error_text(&self) -> String {
        let text = self.diagnostics.trim();
        if text.is_empty() {
            "engine exited with an error".to_string()
        } else {
            text.to_string()
        }
    }
}

/// Kills the child if it is still running when dropped.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            tracing::debug!(pid = self.0.id(), "Killing crypto engine process");
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

struct GpgContext<'a> {
    backend: &'a GpgBackend,
    protocol: Protocol,
    options: ContextOptions,
}

impl GpgContext<'_> {
    /// Arguments shared by every invocation.
    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--batch".into(), "--status-fd".into(), "2".into()];
        if let Some(ref home) = self.backend.homedir {
            args.push("--homedir".into());
            args.push(home.into());
        }
        if self.protocol == Protocol::OpenPgp {
            args.push("--no-tty".into());
            args.push("--trust-model".into());
            args.push(self.options.trust_model.clone().into());
            args.push(if self.options.auto_key_retrieve {
                "--auto-key-retrieve".into()
            } else {
                "--no-auto-key-retrieve".into()
            });
        }
        args
    }

    fn armor_args(&self) -> Vec<OsString> {
        if self.options.armor {
            vec!["--armor".into()]
        } else {
            Vec::new()
        }
    }

    fn run(&self, args: &[OsString], input: &[u8]) -> Result<RunOutput, CryptoError> {
        let binary = self.backend.binary(self.protocol);
        let mut all = self.base_args();
        all.extend(args.iter().cloned());
        tracing::debug!(binary = %binary.display(), args = ?all, "Running crypto engine");

        let child = Command::new(binary)
            .args(&all)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    CryptoError::Engine(format!("{} not found", binary.display()))
                }
                _ => CryptoError::Io(e),
            })?;
        let mut guard = ChildGuard(child);

        let stdin = guard.0.stdin.take();
        let stdout = guard.0.stdout.take();
        let stderr = guard.0.stderr.take();

        let (stdout, stderr) = std::thread::scope(|s| -> Result<_, CryptoError> {
            let writer = s.spawn(move || -> io::Result<()> {
                if let Some(mut pipe) = stdin {
                    match pipe.write_all(input) {
                        // The engine may stop reading early (e.g. no valid data)
                        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                        other => other?,
                    }
                }
                Ok(())
            });
            let err_reader = s.spawn(move || -> io::Result<Vec<u8>> {
                let mut buf = Vec::new();
                if let Some(mut pipe) = stderr {
                    pipe.read_to_end(&mut buf)?;
                }
                Ok(buf)
            });

            let mut out = Vec::new();
            if let Some(mut pipe) = stdout {
                pipe.read_to_end(&mut out)?;
            }

            let panicked = || CryptoError::Unknown("engine I/O thread panicked".to_string());
            writer.join().map_err(|_| panicked())??;
            let err = err_reader.join().map_err(|_| panicked())??;
            Ok((out, err))
        })?;

        let exit = guard.0.wait()?;
        let output = RunOutput {
            status: status::parse_status_lines(&stderr),
            diagnostics: status::diagnostics(&stderr),
            stdout,
            success: exit.success(),
        };
        tracing::debug!(
            code = ?exit.code(),
            status_lines = output.status.len(),
            stdout_len = output.stdout.len(),
            "Crypto engine finished"
        );
        Ok(output)
    }

    fn verification(&self, out: &RunOutput) -> VerificationResult {
        let mut result = status::verification_from_status(&out.status);
        if result.signatures.is_empty() && !out.success {
            result.error = Some(out.error_text());
        }
        result
    }

    fn key_args(flag: &str, keys: &[Key]) -> Vec<OsString> {
        keys.iter()
            .flat_map(|k| [OsString::from(flag), OsString::from(&k.fingerprint)])
            .collect()
    }

    fn key_error(out: &RunOutput) -> CryptoError {
        match status::invalid_key(&out.status) {
            Some(key) => CryptoError::NoKey(key),
            None => CryptoError::Unknown(out.error_text()),
        }
    }
}

impl EngineContext for GpgContext<'_> {
    fn verify_detached(
        &mut self,
        signature: &[u8],
        signed: &[u8],
    ) -> Result<VerificationResult, CryptoError> {
        let mut sig_file = tempfile::NamedTempFile::new()?;
        sig_file.write_all(signature)?;
        sig_file.flush()?;

        let args: Vec<OsString> = vec![
            "--verify".into(),
            sig_file.path().into(),
            "-".into(),
        ];
        let out = self.run(&args, signed)?;
        Ok(self.verification(&out))
    }

    fn verify_opaque(&mut self, signed: &[u8]) -> Result<(VerificationResult, Vec<u8>), CryptoError> {
        let args: Vec<OsString> = match self.protocol {
            Protocol::OpenPgp => vec!["--decrypt".into()],
            Protocol::Cms => vec!["--output".into(), "-".into(), "--verify".into()],
        };
        let out = self.run(&args, signed)?;
        let result = self.verification(&out);
        Ok((result, out.stdout))
    }

    fn decrypt(&mut self, ciphertext: &[u8], verify: bool) -> Result<RawDecryption, CryptoError> {
        let mut args: Vec<OsString> = vec!["--decrypt".into()];
        if !verify && self.protocol == Protocol::OpenPgp {
            args.push("--skip-verify".into());
        }
        let out = self.run(&args, ciphertext)?;
        let mut result = status::decryption_from_status(&out.status);
        if result.outcome == DecryptionOutcome::DecryptionError {
            result.error = Some(out.error_text());
        }
        let verification = if verify {
            status::verification_from_status(&out.status)
        } else {
            VerificationResult::default()
        };
        Ok(RawDecryption {
            result,
            verification,
            plaintext: out.stdout,
        })
    }

    fn sign(&mut self, content: &[u8], signers: &[Key]) -> Result<SignOutput, CryptoError> {
        let mut args: Vec<OsString> = vec!["--detach-sign".into()];
        args.extend(self.armor_args());
        args.extend(Self::key_args("--local-user", signers));
        let out = self.run(&args, content)?;
        if !out.success {
            return Err(Self::key_error(&out));
        }
        let hash_algorithm = status::sig_created_hash(&out.status)
            .ok_or_else(|| CryptoError::Unknown("engine did not report a signature".to_string()))?;
        Ok(SignOutput {
            signature: out.stdout,
            hash_algorithm,
        })
    }

    fn encrypt(
        &mut self,
        content: &[u8],
        recipients: &[Key],
        signers: &[Key],
    ) -> Result<Vec<u8>, CryptoError> {
        // Recipients were validated by the caller
        let mut args: Vec<OsString> = vec!["--always-trust".into(), "--encrypt".into()];
        if !signers.is_empty() {
            args.push("--sign".into());
        }
        args.extend(self.armor_args());
        args.extend(Self::key_args("--recipient", recipients));
        args.extend(Self::key_args("--local-user", signers));
        let out = self.run(&args, content)?;
        if !out.success {
            return Err(Self::key_error(&out));
        }
        Ok(out.stdout)
    }

    fn list_keys(&mut self, patterns: &[String], secret_only: bool) -> Result<Vec<Key>, CryptoError> {
        let listing = match (self.options.key_list_mode, self.protocol, secret_only) {
            (_, _, true) => "--list-secret-keys",
            (KeyListMode::Extern, Protocol::OpenPgp, false) => "--locate-external-keys",
            (KeyListMode::Extern, Protocol::Cms, false) => "--list-external-keys",
            (KeyListMode::Local, _, false) => "--list-keys",
        };
        let mut args: Vec<OsString> = vec![
            "--with-colons".into(),
            "--with-fingerprint".into(),
            listing.into(),
        ];
        if !patterns.is_empty() {
            args.push("--".into());
            args.extend(patterns.iter().map(OsString::from));
        }
        let out = self.run(&args, &[])?;
        // A pattern without matches exits non-zero with an empty listing
        Ok(status::parse_colon_listing(&String::from_utf8_lossy(&out.stdout)))
    }

    fn import(&mut self, data: &[u8]) -> Result<ImportResult, CryptoError> {
        let out = self.run(&[OsString::from("--import")], data)?;
        let has_result = out.status.iter().any(|l| l.keyword == "IMPORT_RES");
        if !out.success && !has_result {
            return Err(CryptoError::Unknown(out.error_text()));
        }
        Ok(status::import_from_status(&out.status))
    }

    fn export(&mut self, fingerprint: &str) -> Result<Vec<u8>, CryptoError> {
        let mut args: Vec<OsString> = vec!["--export".into()];
        args.extend(self.armor_args());
        args.push(fingerprint.into());
        let out = self.run(&args, &[])?;
        if out.stdout.is_empty() {
            return Err(CryptoError::NoKey(fingerprint.to_string()));
        }
        Ok(out.stdout)
    }
}

//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMETREE_CONFIG` (environment variable)
//! 2. `~/.config/mimetree/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimetree\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MimeTreeError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Structural parsing limits.
    pub parser: ParserConfig,
    /// Crypto engine settings.
    pub crypto: CryptoConfig,
    /// Output settings for the CLI.
    pub display: DisplayConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Structural parsing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Maximum nesting depth before a node is treated as an opaque attachment.
    pub max_depth: usize,
}

/// Crypto engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Path or name of the OpenPGP engine binary.
    pub gpg_path: PathBuf,
    /// Path or name of the S/MIME (CMS) engine binary.
    pub gpgsm_path: PathBuf,
    /// Alternative engine home directory (keyrings, trust database).
    pub homedir: Option<PathBuf>,
    /// Trust model passed to the OpenPGP engine.
    pub trust_model: String,
    /// ASCII-armor produced signatures and ciphertext.
    pub armor: bool,
    /// Run the decrypt/verify passes unless `--no-crypto` is given.
    pub decrypt_by_default: bool,
}

/// Output settings for the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Print the HTML body instead of the plain text when both exist.
    pub prefer_html: bool,
    /// `strftime` format string for dates.
    pub date_format: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_depth: 64,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            gpg_path: PathBuf::from("gpg"),
            gpgsm_path: PathBuf::from("gpgsm"),
            homedir: None,
            trust_model: "tofu+pgp".to_string(),
            armor: true,
            decrypt_by_default: true,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            prefer_html: false,
            date_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match load_config_from(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Load configuration from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| MimeTreeError::io(path, e))?;
    toml::from_str::<Config>(&contents).map_err(|e| MimeTreeError::Config(e.to_string()))
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMETREE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mimetree").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimetree")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimetree.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.general.log_level, "warn");
        assert_eq!(cfg.parser.max_depth, 64);
        assert_eq!(cfg.crypto.trust_model, "tofu+pgp");
        assert!(cfg.crypto.armor);
    }

    #[test]
    fn test_serialize_deserialize_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crypto.gpg_path, cfg.crypto.gpg_path);
        assert_eq!(parsed.parser.max_depth, cfg.parser.max_depth);
        assert_eq!(parsed.display.date_format, cfg.display.date_format);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial = r#"
[crypto]
gpg_path = "/opt/gnupg/bin/gpg"

[parser]
max_depth = 8
"#;
        let cfg: Config = toml::from_str(partial).expect("parse partial");
        assert_eq!(cfg.crypto.gpg_path, PathBuf::from("/opt/gnupg/bin/gpg"));
        assert_eq!(cfg.parser.max_depth, 8);
        // Other fields use defaults
        assert_eq!(cfg.crypto.gpgsm_path, PathBuf::from("gpgsm"));
        assert_eq!(cfg.general.log_level, "warn");
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[display]\nprefer_html = true\n").expect("write");
        let cfg = load_config_from(&path).expect("load");
        assert!(cfg.display.prefer_html);
    }

    #[test]
    fn test_load_config_from_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[parser]\nmax_depth = \"deep\"\n").expect("write");
        assert!(matches!(
            load_config_from(&path),
            Err(MimeTreeError::Config(_))
        ));
    }
}

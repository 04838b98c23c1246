//! Centralized error types for mimetree.

use std::path::PathBuf;
use thiserror::Error;

use crate::crypto::CryptoError;

/// All errors produced by the mimetree library.
///
/// Crypto failures that belong to a single part (a message that cannot be
/// decrypted, a bad signature) are recorded on that part and never surface
/// here. This type only covers failures that stop an operation as a whole.
#[derive(Error, Debug)]
pub enum MimeTreeError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("Message file not found: {0}")]
    FileNotFound(PathBuf),

    /// The input could not be turned into a structural tree at all.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A call into the crypto engine failed outside of part rendering
    /// (key listing, import, signing).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The configuration file is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Writing decoded content to disk failed.
    #[error("Export error: {0}")]
    Export(String),
}

/// Convenience alias for `Result<T, MimeTreeError>`.
pub type Result<T> = std::result::Result<T, MimeTreeError>;

impl MimeTreeError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (prefer `MimeTreeError::io`).
impl From<std::io::Error> for MimeTreeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

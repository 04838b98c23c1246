//! Reading individual `.eml` files (RFC 5322 messages without MBOX framing).

use std::path::Path;
use std::sync::Arc;

use crate::error::{MimeTreeError, Result};
use crate::model::node::Node;
use crate::parser::mime;

/// Read the raw bytes of a message file.
pub fn read_message(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MimeTreeError::FileNotFound(path.to_path_buf())
        } else {
            MimeTreeError::io(path, e)
        }
    })
}

/// Read a message file and load it into a structural tree.
pub fn load_eml(path: impl AsRef<Path>) -> Result<Arc<Node>> {
    let data = read_message(path)?;
    if data.is_empty() {
        return Err(MimeTreeError::Parse("empty message".to_string()));
    }
    Ok(mime::load_message(&data))
}

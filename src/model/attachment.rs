//! Attachment summaries.
//!
//! Only metadata is copied out of the part tree; the payload stays on the
//! node and is written out by `export::attachment`.

use serde::Serialize;

use crate::model::metadata::{EncryptionState, SignatureState};
use crate::model::node::Disposition;
use crate::model::part::{PartId, PartRef};

/// Metadata about one attachment part.
#[derive(Debug, Clone, Serialize)]
pub struct AttachmentInfo {
    /// Part the attachment was collected from.
    pub part: PartId,

    /// Filename from the headers, if any.
    pub filename: Option<String>,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Decoded size in bytes.
    pub size: u64,

    /// Content-ID for inline attachments referenced from HTML.
    pub content_id: Option<String>,

    /// `true` if the attachment is shown inline rather than offered for download.
    pub is_inline: bool,

    pub encryption: EncryptionState,
    pub signature: SignatureState,
}

impl AttachmentInfo {
    pub fn from_part(part: PartRef<'_>) -> Self {
        let node = part.node();
        Self {
            part: part.id(),
            filename: part.filename().map(str::to_string),
            content_type: part.mime_type(),
            size: node.map_or(0, |n| n.decoded_content().len() as u64),
            content_id: node.and_then(|n| n.content_id()),
            is_inline: part.disposition() == Disposition::Inline,
            encryption: part.encryption_state(),
            signature: part.signature_state(),
        }
    }

    /// Filename for display; `"unnamed"` when the headers carry none.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or("unnamed")
    }

    /// Size formatted for humans (`"1.50 KiB"`).
    pub fn display_size(&self) -> String {
        humansize::format_size(self.size, humansize::BINARY)
    }
}

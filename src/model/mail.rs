//! Rendered message summary.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::address::EmailAddress;
use super::attachment::AttachmentInfo;
use super::metadata::SecurityLevel;

/// What a reader sees of one message after parsing, decryption and
/// verification.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedMessage {
    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,

    /// Sender (first `From:` header).
    pub from: EmailAddress,

    /// Primary recipients (`To:`).
    pub to: Vec<EmailAddress>,

    /// Parsed date from the `Date:` header.
    pub date: Option<DateTime<Utc>>,

    /// Plain-text body.
    pub text: String,

    /// HTML body with `cid:` images inlined, if the message has one.
    pub html: Option<String>,

    /// Attachment metadata in document order.
    pub attachments: Vec<AttachmentInfo>,

    /// Overall trust classification of the top-level content.
    pub security: SecurityLevel,

    /// Status line of the outermost signature, if any.
    pub signature_status: Option<String>,
}

impl RenderedMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}

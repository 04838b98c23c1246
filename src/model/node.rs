//! Structural nodes: the input tree handed to the object tree parser.
//!
//! A [`Node`] is one MIME entity with its decoded body, the raw bytes it was
//! parsed from, and its children. Nodes are immutable once built and shared
//! through `Arc`, so parts can keep a handle on the node they render.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::parser::header::{decode_charset, strip_angle_brackets};

/// Value of the `Content-Disposition` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// No disposition header.
    #[default]
    None,
    Inline,
    Attachment,
}

impl Disposition {
    /// Parse the (already lower-cased) disposition token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "attachment" => Self::Attachment,
            "inline" => Self::Inline,
            _ => Self::None,
        }
    }
}

/// Media types that carry crypto payloads and are never shown as attachments.
const CRYPTO_SUBTYPES: &[&str] = &[
    "pgp-encrypted",
    "pgp-signature",
    "pkcs7-mime",
    "x-pkcs7-mime",
    "pkcs7-signature",
    "x-pkcs7-signature",
];

/// One MIME entity.
#[derive(Debug, Clone, Default)]
pub struct Node {
    ctype: String,
    subtype: String,
    params: BTreeMap<String, String>,
    disposition: Disposition,
    disposition_filename: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    body_charset: Option<String>,
    raw: Vec<u8>,
    children: Vec<Arc<Node>>,
    encapsulated: Option<Arc<Node>>,
    attachment: bool,
    root: bool,
}

impl Node {
    /// Declared media type (lower-case), empty if no `Content-Type` was given.
    pub fn media_type(&self) -> &str {
        &self.ctype
    }

    /// Declared subtype (lower-case), empty if no `Content-Type` was given.
    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    /// Effective `type/subtype`; entities without a content type are `text/plain`.
    pub fn mime_type(&self) -> String {
        if self.ctype.is_empty() {
            "text/plain".to_string()
        } else if self.subtype.is_empty() {
            format!("{}/*", self.ctype)
        } else {
            format!("{}/{}", self.ctype, self.subtype)
        }
    }

    /// Whether the effective mime type equals `mime` (case-insensitive).
    pub fn is_mime_type(&self, mime: &str) -> bool {
        self.mime_type().eq_ignore_ascii_case(mime)
    }

    /// A `Content-Type` parameter (case-insensitive name).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Declared charset, `us-ascii` when missing.
    pub fn charset(&self) -> &str {
        self.param("charset").unwrap_or("us-ascii")
    }

    /// Charset the decoded body bytes are actually in.
    ///
    /// Text bodies converted by the loader are already UTF-8 regardless of
    /// what the header declares.
    pub fn content_charset(&self) -> &str {
        self.body_charset.as_deref().unwrap_or_else(|| self.charset())
    }

    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// All headers as `(lowercase_name, value)` in message order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of a header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::parser::header::get_header(&self.headers, name)
    }

    /// Whether the entity carried a header block at all.
    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }

    /// Body with the transfer encoding removed.
    pub fn decoded_content(&self) -> &[u8] {
        &self.body
    }

    /// Body decoded to text using [`Node::content_charset`].
    pub fn decoded_text(&self) -> String {
        decode_charset(self.content_charset(), &self.body)
    }

    /// Headers plus encoded body exactly as they appeared in the input.
    pub fn encoded_content(&self) -> &[u8] {
        &self.raw
    }

    /// Disposition filename, else the content-type `name` parameter.
    pub fn filename(&self) -> Option<&str> {
        self.disposition_filename
            .as_deref()
            .or_else(|| self.param("name"))
            .filter(|s| !s.is_empty())
    }

    /// `Content-ID` without angle brackets.
    pub fn content_id(&self) -> Option<String> {
        self.header("content-id")
            .map(strip_angle_brackets)
            .filter(|s| !s.is_empty())
    }

    pub fn children(&self) -> &[Arc<Node>] {
        &self.children
    }

    /// The embedded message of a `message/rfc822` entity.
    pub fn encapsulated(&self) -> Option<&Arc<Node>> {
        self.encapsulated.as_ref()
    }

    pub fn is_attachment(&self) -> bool {
        self.attachment
    }

    /// Whether this node is the top-level entity of a message.
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Decide whether the node is an attachment, given its parent's mime type.
    fn classify_attachment(&self, parent_mime: Option<&str>) -> bool {
        if self.ctype == "multipart" {
            return false;
        }
        if self.is_mime_type("message/rfc822") {
            return true;
        }
        if self.root {
            return false;
        }
        if self.ctype == "application" {
            if CRYPTO_SUBTYPES.contains(&self.subtype.as_str()) {
                return false;
            }
            if self.subtype == "octet-stream"
                && parent_mime.is_some_and(|p| p.eq_ignore_ascii_case("multipart/encrypted"))
            {
                return false;
            }
        }
        if self.filename().is_some() {
            return true;
        }
        self.disposition == Disposition::Attachment
    }
}

/// Builds [`Node`] trees, computing the derived attachment flags.
///
/// Used by the loader and to synthesize nodes from decrypted or armored data.
#[derive(Debug, Clone, Default)]
pub struct NodeBuilder {
    node: Node,
    children: Vec<NodeBuilder>,
    encapsulated: Option<Box<NodeBuilder>>,
    raw_set: bool,
}

impl NodeBuilder {
    /// Start a node with a `type/subtype` (empty string for "no content type").
    pub fn new(mime_type: &str) -> Self {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        let (ctype, subtype) = match mime_type.split_once('/') {
            Some((t, s)) => (t.trim().to_string(), s.trim().to_string()),
            None => (mime_type, String::new()),
        };
        Self {
            node: Node {
                ctype,
                subtype,
                ..Node::default()
            },
            ..Self::default()
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.node
            .params
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
        self.node.params.extend(params);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.node
            .headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.node.headers.extend(headers);
        self
    }

    pub fn disposition(mut self, disposition: Disposition) -> Self {
        self.node.disposition = disposition;
        self
    }

    pub fn filename(mut self, filename: &str) -> Self {
        self.node.disposition_filename = Some(filename.to_string());
        self
    }

    /// Decoded body bytes.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.node.body = body.into();
        self
    }

    /// Mark the body bytes as already converted to `charset`.
    pub fn body_charset(mut self, charset: &str) -> Self {
        self.node.body_charset = Some(charset.to_string());
        self
    }

    /// Raw headers and encoded body. Synthesized from headers and body if never set.
    pub fn raw(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.node.raw = raw.into();
        self.raw_set = true;
        self
    }

    pub fn child(mut self, child: NodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn encapsulated(mut self, message: NodeBuilder) -> Self {
        self.encapsulated = Some(Box::new(message));
        self
    }

    /// Finish a top-level node.
    pub fn build(self) -> Arc<Node> {
        self.finish(None, true)
    }

    /// Finish a node that is not the top level of a message.
    pub fn build_detached(self) -> Arc<Node> {
        self.finish(None, false)
    }

    fn finish(self, parent_mime: Option<&str>, root: bool) -> Arc<Node> {
        let mut node = self.node;
        node.root = root;
        let own_mime = node.mime_type();

        if !self.raw_set {
            let mut raw = Vec::with_capacity(node.body.len() + 64);
            for (name, value) in &node.headers {
                raw.extend_from_slice(name.as_bytes());
                raw.extend_from_slice(b": ");
                raw.extend_from_slice(value.as_bytes());
                raw.push(b'\n');
            }
            if !node.headers.is_empty() {
                raw.push(b'\n');
            }
            raw.extend_from_slice(&node.body);
            node.raw = raw;
        }

        node.children = self
            .children
            .into_iter()
            .map(|c| c.finish(Some(&own_mime), false))
            .collect();
        node.encapsulated = self.encapsulated.map(|m| m.finish(None, true));
        node.attachment = node.classify_attachment(parent_mime);
        Arc::new(node)
    }
}

//! Rendering pipeline: load, parse, decrypt and verify, then query.
//!
//! [`MessageParser`] holds the configured object tree parser and the
//! optional crypto engine; every call produces an independent
//! [`ParsedMessage`].

pub mod collect;
pub mod decrypt;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::crypto::engine::CryptoEngine;
use crate::crypto::ImportResult;
use crate::error::Result;
use crate::model::address::EmailAddress;
use crate::model::attachment::AttachmentInfo;
use crate::model::mail::RenderedMessage;
use crate::model::metadata::SecurityLevel;
use crate::model::node::Node;
use crate::model::part::{PartRef, PartTag, PartTree};
use crate::parser::tree::ObjectTreeParser;
use crate::parser::{eml, header, mime};

use self::decrypt::DecryptVerify;

/// Configured message pipeline.
pub struct MessageParser {
    parser: ObjectTreeParser,
    engine: Option<CryptoEngine>,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    /// Parser without crypto: signed content is shown unverified and
    /// encrypted parts stay closed.
    pub fn new() -> Self {
        Self {
            parser: ObjectTreeParser::new(),
            engine: None,
        }
    }

    /// Parser built from the configuration. The configured engine is used
    /// only when `crypto` is set and `decrypt_by_default` is on.
    pub fn from_config(config: &Config, crypto: bool) -> Self {
        let engine = (crypto && config.crypto.decrypt_by_default)
            .then(|| CryptoEngine::from_config(&config.crypto));
        Self {
            parser: ObjectTreeParser::from_config(&config.parser),
            engine,
        }
    }

    pub fn with_engine(mut self, engine: CryptoEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_parser(mut self, parser: ObjectTreeParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn parser(&self) -> &ObjectTreeParser {
        &self.parser
    }

    pub fn engine(&self) -> Option<&CryptoEngine> {
        self.engine.as_ref()
    }

    /// Parse raw RFC 5322 bytes.
    pub fn parse_bytes(&self, data: &[u8]) -> ParsedMessage {
        self.parse_node(mime::load_message(data))
    }

    /// Read and parse a `.eml` file.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParsedMessage> {
        Ok(self.parse_node(eml::load_eml(path)?))
    }

    /// Parse an already loaded node tree.
    pub fn parse_node(&self, root: Arc<Node>) -> ParsedMessage {
        let mut tree = self.parser.parse(&root);
        match &self.engine {
            Some(engine) => DecryptVerify::new(engine, &self.parser).run(&mut tree),
            None => decrypt::reveal_unverified(&self.parser, &mut tree),
        }
        tracing::debug!(
            parts = tree.len(),
            crypto = self.engine.is_some(),
            "Rendered message"
        );
        ParsedMessage { root, tree }
    }

    /// Import every certificate part of `message` into the engine's keyring.
    pub fn import_certificates(&self, message: &ParsedMessage) -> Vec<ImportResult> {
        match &self.engine {
            Some(engine) => collect::import_certificates(engine, &message.tree),
            None => {
                tracing::warn!("No crypto engine configured, skipping certificate import");
                Vec::new()
            }
        }
    }
}

/// A message after parsing and the crypto passes.
pub struct ParsedMessage {
    root: Arc<Node>,
    tree: PartTree,
}

impl ParsedMessage {
    pub fn root_node(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn tree(&self) -> &PartTree {
        &self.tree
    }

    /// The top-level part.
    pub fn root_part(&self) -> PartRef<'_> {
        self.tree.part(self.tree.root())
    }

    /// Parts that make up the readable body.
    pub fn content_parts(&self) -> Vec<PartRef<'_>> {
        collect::collect_content_parts(&self.tree, self.tree.root())
            .into_iter()
            .map(|id| self.tree.part(id))
            .collect()
    }

    pub fn attachment_parts(&self) -> Vec<PartRef<'_>> {
        collect::collect_attachment_parts(&self.tree, self.tree.root())
            .into_iter()
            .map(|id| self.tree.part(id))
            .collect()
    }

    pub fn attachments(&self) -> Vec<AttachmentInfo> {
        self.attachment_parts()
            .into_iter()
            .map(AttachmentInfo::from_part)
            .collect()
    }

    /// Plain-text body; converted from the HTML body when there is no text.
    pub fn text(&self) -> String {
        let text = collect::plain_text_content(&self.tree);
        if !text.trim().is_empty() {
            return text;
        }
        self.html().map(|h| mime::html_to_text(&h)).unwrap_or(text)
    }

    /// HTML body with `cid:` images inlined, if any part carries HTML.
    pub fn html(&self) -> Option<String> {
        if !self.has_html() {
            return None;
        }
        let html = collect::html_content(&self.tree);
        Some(collect::resolve_cid_links(&self.root, &self.tree, &html))
    }

    fn has_html(&self) -> bool {
        self.tree
            .descendants(self.tree.root())
            .into_iter()
            .any(|id| self.tree.part(id).is_html())
    }

    /// Indented dump of the node and part trees.
    pub fn structure(&self) -> String {
        collect::structure_as_string(&self.root, &self.tree)
    }

    /// Security level of the first content part.
    pub fn security_level(&self) -> SecurityLevel {
        self.content_parts()
            .first()
            .map_or(SecurityLevel::Unknown, |p| p.security_level())
    }

    /// Status line of the outermost signature.
    pub fn signature_status(&self) -> Option<String> {
        self.tree
            .descendants(self.tree.root())
            .into_iter()
            .map(|id| self.tree.part(id))
            .find(|p| p.tag() == PartTag::Signed)
            .map(|p| p.metadata().status.clone())
    }

    pub fn summary(&self) -> RenderedMessage {
        let subject = self
            .root
            .header("subject")
            .map(header::decode_encoded_words)
            .unwrap_or_default();
        let from = self
            .root
            .header("from")
            .map(EmailAddress::from_header)
            .unwrap_or_default();
        let to = self
            .root
            .header("to")
            .map(EmailAddress::parse_list)
            .unwrap_or_default();
        let date = self.root.header("date").and_then(header::parse_date);

        RenderedMessage {
            subject,
            from,
            to,
            date,
            text: self.text(),
            html: self.html(),
            attachments: self.attachments(),
            security: self.security_level(),
            signature_status: self.signature_status(),
        }
    }
}

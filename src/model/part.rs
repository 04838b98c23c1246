//! The rendered part tree.
//!
//! Parts live in an arena ([`PartTree`]) and refer to each other by
//! [`PartId`]. A part owns its children through the `children` list; the
//! `parent` link is only used for upward queries (headers, enclosing
//! signatures). The representations of an alternative part are allocated
//! in the same arena without a parent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crypto::Protocol;
use crate::model::metadata::{
    EncryptionState, PartError, PartMetaData, SecurityLevel, SignatureState,
};
use crate::model::node::{Disposition, Node};
use crate::parser::header;

/// Index of a part in its [`PartTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PartId(usize);

impl PartId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Representations an alternative part can hold, in display preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AlternativeMode {
    Plain,
    Html,
    ICal,
}

/// Encrypted payload and what to do with it.
#[derive(Debug, Clone)]
pub struct EncryptedData {
    pub protocol: Protocol,
    /// Node carrying the ciphertext; the part's own node when `None`.
    pub ciphertext: Option<Arc<Node>>,
    /// Parse the plaintext into child parts after decryption.
    pub parse_after: bool,
    /// Plaintext of a successful decryption.
    pub decrypted: Vec<u8>,
}

/// Signed payload. A detached signature keeps its signature node as the
/// part's own node.
#[derive(Debug, Clone)]
pub struct SignedData {
    pub protocol: Protocol,
    /// Data covered by the signature. `None` once the signature has been
    /// resolved elsewhere (a signature recovered while decrypting).
    pub signed_data: Option<Arc<Node>>,
    pub parse_after: bool,
}

/// Discriminant and variant data of a part.
#[derive(Debug, Clone)]
pub enum PartKind {
    /// Sibling list produced for a node and the nodes following it.
    List,
    /// A block of text or a header-preserving wrapper.
    Message,
    /// A `text/*` body, split into plain and armored blocks.
    Text {
        signature_state: SignatureState,
        encryption_state: EncryptionState,
    },
    Html,
    Attachment,
    Alternative {
        modes: BTreeMap<AlternativeMode, PartId>,
    },
    Encrypted(EncryptedData),
    Signed(SignedData),
    Cert { protocol: Protocol },
    Encapsulated,
    Headers,
}

/// Fieldless copy of [`PartKind`] for matching and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PartTag {
    List,
    Message,
    Text,
    Html,
    Attachment,
    Alternative,
    Encrypted,
    Signed,
    Cert,
    Encapsulated,
    Headers,
}

impl PartTag {
    pub fn name(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Message => "message",
            Self::Text => "text",
            Self::Html => "html",
            Self::Attachment => "attachment",
            Self::Alternative => "alternative",
            Self::Encrypted => "encrypted",
            Self::Signed => "signed",
            Self::Cert => "cert",
            Self::Encapsulated => "encapsulated",
            Self::Headers => "headers",
        }
    }
}

impl std::fmt::Display for PartTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl PartKind {
    pub fn tag(&self) -> PartTag {
        match self {
            Self::List => PartTag::List,
            Self::Message => PartTag::Message,
            Self::Text { .. } => PartTag::Text,
            Self::Html => PartTag::Html,
            Self::Attachment => PartTag::Attachment,
            Self::Alternative { .. } => PartTag::Alternative,
            Self::Encrypted(_) => PartTag::Encrypted,
            Self::Signed(_) => PartTag::Signed,
            Self::Cert { .. } => PartTag::Cert,
            Self::Encapsulated => PartTag::Encapsulated,
            Self::Headers => PartTag::Headers,
        }
    }
}

/// One node of the output tree.
#[derive(Debug, Clone)]
pub struct Part {
    pub(crate) kind: PartKind,
    pub(crate) text: String,
    pub(crate) parent: Option<PartId>,
    pub(crate) children: Vec<PartId>,
    pub(crate) node: Option<Arc<Node>>,
    /// Synthesized nodes whose lifetime is bound to this part.
    pub(crate) owned_nodes: Vec<Arc<Node>>,
    pub(crate) error: PartError,
    pub(crate) meta: PartMetaData,
    pub(crate) root: bool,
}

impl Part {
    pub fn new(kind: PartKind, node: Option<Arc<Node>>) -> Self {
        let mut meta = PartMetaData::default();
        match &kind {
            PartKind::Signed(_) => {
                meta.is_signed = true;
                meta.status = "Signature not verified.".to_string();
            }
            PartKind::Encrypted(_) => {
                meta.status = "Not decrypted.".to_string();
            }
            PartKind::Encapsulated => meta.is_encapsulated_rfc822 = true,
            _ => {}
        }
        Self {
            kind,
            text: String::new(),
            parent: None,
            children: Vec::new(),
            node,
            owned_nodes: Vec::new(),
            error: PartError::NoError,
            meta,
            root: false,
        }
    }

    /// A `Message` part holding `text` and no node.
    pub fn message(text: impl Into<String>) -> Self {
        let mut part = Self::new(PartKind::Message, None);
        part.text = text.into();
        part
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Keep `node` alive for as long as this part exists.
    pub fn bind_lifetime(&mut self, node: Arc<Node>) {
        self.owned_nodes.push(node);
    }

    pub fn kind(&self) -> &PartKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut PartKind {
        &mut self.kind
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    pub fn owned_nodes(&self) -> &[Arc<Node>] {
        &self.owned_nodes
    }

    pub fn metadata(&self) -> &PartMetaData {
        &self.meta
    }

    pub fn metadata_mut(&mut self) -> &mut PartMetaData {
        &mut self.meta
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn set_error(&mut self, error: PartError) {
        self.error = error;
    }

    pub fn set_root(&mut self, root: bool) {
        self.root = root;
    }

    pub fn error(&self) -> PartError {
        self.error
    }
}

/// Arena holding every part of one parse.
#[derive(Debug, Clone)]
pub struct PartTree {
    parts: Vec<Part>,
    root: PartId,
}

impl PartTree {
    /// A tree consisting of `root` only.
    pub fn new(root: Part) -> Self {
        Self {
            parts: vec![root],
            root: PartId(0),
        }
    }

    pub fn root(&self) -> PartId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, id: PartId) -> &Part {
        &self.parts[id.0]
    }

    pub fn get_mut(&mut self, id: PartId) -> &mut Part {
        &mut self.parts[id.0]
    }

    /// Query handle for `id`.
    pub fn part(&self, id: PartId) -> PartRef<'_> {
        PartRef { tree: self, id }
    }

    /// Add a part without a parent.
    pub fn alloc(&mut self, part: Part) -> PartId {
        self.parts.push(part);
        PartId(self.parts.len() - 1)
    }

    /// Make `child` the last child of `parent`.
    pub fn append_child(&mut self, parent: PartId, child: PartId) {
        self.parts[child.0].parent = Some(parent);
        self.parts[parent.0].children.push(child);
    }

    /// Allocate `part` as the last child of `parent`.
    pub fn push_child(&mut self, parent: PartId, part: Part) -> PartId {
        let id = self.alloc(part);
        self.append_child(parent, id);
        id
    }

    /// Move every child of `from` to the end of `to`'s children.
    pub fn adopt_children(&mut self, to: PartId, from: PartId) {
        let children = std::mem::take(&mut self.parts[from.0].children);
        for child in children {
            self.append_child(to, child);
        }
    }

    /// `start` and all its descendants in document order.
    pub fn descendants(&self, start: PartId) -> Vec<PartId> {
        let mut out = Vec::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        out
    }
}

/// Borrowed view of one part with the consumer query surface.
#[derive(Clone, Copy)]
pub struct PartRef<'a> {
    tree: &'a PartTree,
    id: PartId,
}

impl<'a> PartRef<'a> {
    pub fn id(&self) -> PartId {
        self.id
    }

    pub fn tree(&self) -> &'a PartTree {
        self.tree
    }

    fn part(&self) -> &'a Part {
        self.tree.get(self.id)
    }

    fn other(&self, id: PartId) -> PartRef<'a> {
        PartRef {
            tree: self.tree,
            id,
        }
    }

    pub fn tag(&self) -> PartTag {
        self.part().kind.tag()
    }

    pub fn kind(&self) -> &'a PartKind {
        &self.part().kind
    }

    pub fn node(&self) -> Option<&'a Arc<Node>> {
        self.part().node.as_ref()
    }

    pub fn metadata(&self) -> &'a PartMetaData {
        &self.part().meta
    }

    pub fn parent(&self) -> Option<PartRef<'a>> {
        self.part().parent.map(|id| self.other(id))
    }

    pub fn subparts(&self) -> impl Iterator<Item = PartRef<'a>> + 'a {
        let tree = self.tree;
        self.part()
            .children
            .iter()
            .map(move |&id| PartRef { tree, id })
    }

    pub fn has_subparts(&self) -> bool {
        !self.part().children.is_empty()
    }

    fn children_text(&self) -> String {
        self.subparts().map(|p| p.text()).collect()
    }

    fn mode(&self, mode: AlternativeMode) -> Option<PartRef<'a>> {
        match &self.part().kind {
            PartKind::Alternative { modes } => modes.get(&mode).map(|&id| self.other(id)),
            _ => None,
        }
    }

    /// Rendered text of the part.
    pub fn text(&self) -> String {
        let part = self.part();
        match &part.kind {
            PartKind::List | PartKind::Text { .. } | PartKind::Encapsulated => {
                self.children_text()
            }
            PartKind::Alternative { .. } => self
                .mode(AlternativeMode::Plain)
                .map(|p| p.text())
                .unwrap_or_default(),
            PartKind::Encrypted(_) => match self.subparts().next() {
                Some(first) if first.tag() == PartTag::Signed => first.text(),
                _ => part.text.clone(),
            },
            PartKind::Cert { .. } => String::new(),
            _ => part.text.clone(),
        }
    }

    /// Text suitable for a plain-text rendering of this part alone.
    pub fn plaintext_content(&self) -> String {
        match &self.part().kind {
            PartKind::List | PartKind::Text { .. } => String::new(),
            PartKind::Alternative { .. } => self.text(),
            PartKind::Encrypted(_) | PartKind::Signed(_) => self.inline_crypto_text(),
            _ => self.text(),
        }
    }

    /// HTML of this part alone; the plain text when there is no HTML.
    pub fn html_content(&self) -> String {
        match &self.part().kind {
            PartKind::List | PartKind::Text { .. } => String::new(),
            PartKind::Alternative { .. } => match self.mode(AlternativeMode::Html) {
                Some(html) => html.text(),
                None => self.plaintext_content(),
            },
            PartKind::Encrypted(_) | PartKind::Signed(_) => self.inline_crypto_text(),
            _ => self.text(),
        }
    }

    /// Signed and encrypted parts only expose content when they came from inline armor.
    fn inline_crypto_text(&self) -> String {
        if self.part().node.is_none() {
            self.part().text.clone()
        } else {
            String::new()
        }
    }

    /// Calendar text of an alternative part.
    pub fn ical_content(&self) -> String {
        self.mode(AlternativeMode::ICal)
            .map(|p| p.text())
            .unwrap_or_default()
    }

    pub fn available_modes(&self) -> Vec<AlternativeMode> {
        match &self.part().kind {
            PartKind::Alternative { modes } => modes.keys().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_html(&self) -> bool {
        match &self.part().kind {
            PartKind::Html => true,
            PartKind::Alternative { modes } => modes.contains_key(&AlternativeMode::Html),
            _ => false,
        }
    }

    pub fn is_attachment(&self) -> bool {
        self.node().is_some_and(|n| n.is_attachment())
    }

    pub fn is_root(&self) -> bool {
        self.part().root
    }

    /// `type/subtype` of the part's node, empty without a node.
    pub fn mime_type(&self) -> String {
        self.node().map(|n| n.mime_type()).unwrap_or_default()
    }

    pub fn filename(&self) -> Option<&'a str> {
        self.node().and_then(|n| n.filename())
    }

    pub fn charset(&self) -> &'a str {
        self.node().map_or("us-ascii", |n| n.charset())
    }

    pub fn disposition(&self) -> Disposition {
        self.node().map_or(Disposition::None, |n| n.disposition())
    }

    /// A header of this part's node, else of the nearest ancestor that has it.
    pub fn header(&self, name: &str) -> Option<&'a str> {
        let mut current = Some(*self);
        while let Some(p) = current {
            if let Some(value) = p.node().and_then(|n| n.header(name)) {
                return Some(value);
            }
            current = p.parent();
        }
        None
    }

    fn self_and_ancestors(&self) -> impl Iterator<Item = PartRef<'a>> + 'a {
        std::iter::successors(Some(*self), |p| p.parent())
    }

    /// This part and every enclosing part that is a signed part.
    pub fn signatures(&self) -> Vec<PartRef<'a>> {
        self.self_and_ancestors()
            .filter(|p| p.tag() == PartTag::Signed)
            .collect()
    }

    /// This part and every enclosing part that is an encrypted part.
    pub fn encryptions(&self) -> Vec<PartRef<'a>> {
        self.self_and_ancestors()
            .filter(|p| p.tag() == PartTag::Encrypted)
            .collect()
    }

    fn inline_states(&self) -> Option<(SignatureState, EncryptionState)> {
        match self.part().kind {
            PartKind::Text {
                signature_state,
                encryption_state,
            } => Some((signature_state, encryption_state)),
            _ => None,
        }
    }

    pub fn encryption_state(&self) -> EncryptionState {
        if let Some((_, state)) = self.inline_states() {
            if state.is_encrypted() {
                return state;
            }
        }
        if self.encryptions().iter().any(|p| p.metadata().is_encrypted) {
            EncryptionState::FullyEncrypted
        } else {
            EncryptionState::NotEncrypted
        }
    }

    pub fn signature_state(&self) -> SignatureState {
        if let Some((state, _)) = self.inline_states() {
            if state.is_signed() {
                return state;
            }
        }
        if self.signatures().iter().any(|p| p.metadata().is_signed) {
            SignatureState::FullySigned
        } else {
            SignatureState::NotSigned
        }
    }

    /// Metadata of the outermost signature covering this part.
    fn signature_info(&self) -> Option<&'a PartMetaData> {
        self.signatures()
            .into_iter()
            .filter(|p| p.metadata().is_signed)
            .last()
            .map(|p| p.metadata())
    }

    pub fn security_level(&self) -> SecurityLevel {
        SecurityLevel::classify(
            self.signature_state(),
            self.encryption_state(),
            self.signature_info(),
        )
    }

    pub fn signature_security_level(&self) -> SecurityLevel {
        SecurityLevel::for_signature(self.signature_state(), self.signature_info())
    }

    pub fn encryption_security_level(&self) -> SecurityLevel {
        SecurityLevel::for_encryption(self.encryption_state(), self.error())
    }

    pub fn error(&self) -> PartError {
        self.part().error
    }

    pub fn error_string(&self) -> &'a str {
        &self.part().meta.error_text
    }

    /// `From` of an encapsulated message, decoded.
    pub fn from(&self) -> Option<String> {
        self.encapsulated_header("from")
            .map(header::decode_encoded_words)
    }

    /// `Date` of an encapsulated message.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.encapsulated_header("date")
            .and_then(header::parse_date)
    }

    fn encapsulated_header(&self, name: &str) -> Option<&'a str> {
        if self.tag() != PartTag::Encapsulated {
            return None;
        }
        self.node()?.encapsulated()?.header(name)
    }
}

impl std::fmt::Debug for PartRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartRef")
            .field("id", &self.id)
            .field("tag", &self.tag())
            .finish()
    }
}

//! The object tree parser: structural nodes in, part tree out.
//!
//! Each node is handed to the formatters registered for its media type
//! (exact subtype first, then the `*` subtype); the first formatter that
//! produces parts wins. Nodes nobody claims become attachment parts.
//! Formatters recurse through [`ParseContext`].

use std::sync::Arc;

use crate::config::ParserConfig;
use crate::model::node::Node;
use crate::model::part::{Part, PartId, PartKind, PartTree};

use super::mime::{self, MAX_DEPTH};
use super::registry::{FormatterRegistry, ANY};

/// Filename suffixes of S/MIME payloads sent as `application/octet-stream`.
const PKCS7_SUFFIXES: &[&str] = &["p7m", "p7s", "p7c"];

/// Dispatches structural nodes to formatters.
#[derive(Debug, Clone)]
pub struct ObjectTreeParser {
    registry: FormatterRegistry,
    max_depth: usize,
}

impl Default for ObjectTreeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTreeParser {
    /// Parser with the built-in formatters.
    pub fn new() -> Self {
        Self::with_registry(FormatterRegistry::with_defaults())
    }

    pub fn with_registry(registry: FormatterRegistry) -> Self {
        Self {
            registry,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new().with_max_depth(config.max_depth)
    }

    /// Nesting depth beyond which nodes are no longer dispatched.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn registry(&self) -> &FormatterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FormatterRegistry {
        &mut self.registry
    }

    /// Parse a message tree. The root of the result is a list part for `root`.
    pub fn parse(&self, root: &Arc<Node>) -> PartTree {
        let mut top = Part::new(PartKind::List, Some(Arc::clone(root)));
        top.set_root(root.is_root());
        let mut tree = PartTree::new(top);
        let target = tree.root();
        let mut ctx = ParseContext {
            parser: self,
            tree: &mut tree,
            depth: 0,
        };
        ctx.parse_nodes(target, None, std::slice::from_ref(root), 0, false);
        tracing::debug!(parts = tree.len(), "Parsed object tree");
        tree
    }

    /// Load `data` as a node bound to `target` and append its parts to `target`.
    pub fn parse_data_into(&self, tree: &mut PartTree, target: PartId, data: &[u8], charset: &str) {
        let mut ctx = ParseContext {
            parser: self,
            tree,
            depth: 0,
        };
        ctx.parse_data_into(target, data, charset);
    }
}

/// Mutable parse state handed to formatters.
pub struct ParseContext<'a> {
    parser: &'a ObjectTreeParser,
    tree: &'a mut PartTree,
    depth: usize,
}

impl ParseContext<'_> {
    pub fn tree(&self) -> &PartTree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut PartTree {
        self.tree
    }

    /// Allocate a part without a parent.
    pub fn alloc(&mut self, part: Part) -> PartId {
        self.tree.alloc(part)
    }

    /// A list part for `parent`'s child at `index`, holding the parts of that
    /// child and, unless `only_one` is set, of every following sibling.
    pub fn mime_part(&mut self, parent: &Arc<Node>, index: usize, only_one: bool) -> PartId {
        let siblings = parent.children();
        let node = siblings.get(index).cloned();
        let id = self.tree.alloc(Part::new(PartKind::List, node));
        if index < siblings.len() {
            self.depth += 1;
            self.parse_nodes(id, Some(parent), siblings, index, only_one);
            self.depth -= 1;
        }
        id
    }

    /// Parse a parentless `node` and append its parts to `target`.
    pub fn parse_into(&mut self, target: PartId, node: &Arc<Node>) {
        if node.is_root() {
            self.tree.get_mut(target).set_root(true);
        }
        self.depth += 1;
        self.parse_nodes(target, None, std::slice::from_ref(node), 0, false);
        self.depth -= 1;
    }

    /// Load `data` (decrypted or armored bytes) as a node bound to `target`
    /// and append its parts to `target`.
    pub fn parse_data_into(&mut self, target: PartId, data: &[u8], charset: &str) {
        let node = mime::load_body(data, charset);
        self.tree.get_mut(target).bind_lifetime(Arc::clone(&node));
        self.parse_into(target, &node);
    }

    fn parse_nodes(
        &mut self,
        target: PartId,
        parent: Option<&Arc<Node>>,
        siblings: &[Arc<Node>],
        start: usize,
        only_one: bool,
    ) {
        for node in siblings.iter().skip(start) {
            let parts = self.process_node(node, parent);
            for part in parts {
                self.tree.append_child(target, part);
            }
            if only_one {
                break;
            }
        }
    }

    fn process_node(&mut self, node: &Arc<Node>, parent: Option<&Arc<Node>>) -> Vec<PartId> {
        if self.depth > self.parser.max_depth {
            tracing::warn!(
                depth = self.depth,
                mime_type = %node.mime_type(),
                "Nesting too deep, treating node as attachment"
            );
            return vec![self.attachment(node)];
        }

        let (media_type, subtype) = effective_type(node);
        let list = self.process_type(node, parent, media_type, subtype);
        if !list.is_empty() {
            return list;
        }
        let list = self.process_type(node, parent, media_type, ANY);
        if !list.is_empty() {
            return list;
        }
        self.default_handling(node, parent)
    }

    fn process_type(
        &mut self,
        node: &Arc<Node>,
        parent: Option<&Arc<Node>>,
        media_type: &str,
        subtype: &str,
    ) -> Vec<PartId> {
        let parser = self.parser;
        for formatter in parser.registry.lookup(media_type, subtype) {
            let list = formatter.process(self, node, parent);
            if !list.is_empty() {
                tracing::trace!(
                    formatter = formatter.name(),
                    media_type,
                    subtype,
                    parts = list.len(),
                    "Formatter produced parts"
                );
                return list;
            }
        }
        Vec::new()
    }

    fn default_handling(&mut self, node: &Arc<Node>, parent: Option<&Arc<Node>>) -> Vec<PartId> {
        if node.is_mime_type("application/octet-stream") {
            let name = node.param("name").unwrap_or_default().to_ascii_lowercase();
            if PKCS7_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                tracing::debug!(name = %name, "Retrying octet-stream as pkcs7-mime");
                let list = self.process_type(node, parent, "application", "pkcs7-mime");
                if !list.is_empty() {
                    return list;
                }
            }
        }
        vec![self.attachment(node)]
    }

    /// An opaque attachment part for `node`; text bodies keep their text.
    pub fn attachment(&mut self, node: &Arc<Node>) -> PartId {
        let mut part = Part::new(PartKind::Attachment, Some(Arc::clone(node)));
        if node.media_type() == "text" {
            part.set_text(node.decoded_text());
        }
        self.tree.alloc(part)
    }
}

/// `(type, subtype)` used for dispatch; `text/plain` when either is missing.
fn effective_type(node: &Node) -> (&str, &str) {
    if node.media_type().is_empty() || node.subtype().is_empty() {
        ("text", "plain")
    } else {
        (node.media_type(), node.subtype())
    }
}

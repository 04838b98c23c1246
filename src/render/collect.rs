//! Queries over a finished part tree: content and attachment collection,
//! text/HTML extraction, certificate import, `cid:` link resolution and a
//! debug dump of the structure.

use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};

use base64::Engine as _;
use regex::Regex;

use crate::crypto::engine::CryptoEngine;
use crate::crypto::ImportResult;
use crate::model::node::Node;
use crate::model::part::{PartId, PartKind, PartRef, PartTag, PartTree};

/// `src="cid:…"` or `src='cid:…'`.
static CID_SRC: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r#"src\s*=\s*(?:"(cid:[^"']+)"|'(cid:[^"']+)')"#)
});

/// Collect parts bottom-up from `start`.
///
/// `evaluate_subtree` decides whether to descend into a part; `select`
/// decides whether a part is taken. A part is only considered when nothing
/// below it was taken, so selecting a part shadows its ancestors.
pub fn collect(
    tree: &PartTree,
    start: PartId,
    evaluate_subtree: &dyn Fn(PartRef<'_>) -> bool,
    select: &dyn Fn(PartRef<'_>) -> bool,
) -> Vec<PartId> {
    let part = tree.part(start);
    let mut list = Vec::new();
    if evaluate_subtree(part) {
        for sub in part.subparts() {
            list.extend(collect(tree, sub.id(), evaluate_subtree, select));
        }
    }
    if list.is_empty() && select(part) {
        list.push(start);
    }
    list
}

/// Parts that make up the readable body, in document order.
///
/// Embedded messages are returned as a whole rather than descended into.
pub fn collect_content_parts(tree: &PartTree, start: PartId) -> Vec<PartId> {
    collect(
        tree,
        start,
        &|part| part.id() == start || part.tag() != PartTag::Encapsulated,
        &|part| match part.tag() {
            PartTag::Attachment => part.mime_type() == "text/calendar",
            PartTag::Text => !part
                .parent()
                .is_some_and(|p| p.tag() == PartTag::Encrypted && p.error().is_error()),
            PartTag::Alternative | PartTag::Html => true,
            PartTag::Encapsulated => part.id() != start,
            PartTag::Encrypted => part.error().is_error(),
            // A signature without sub-parts carries the text itself.
            PartTag::Signed => !part.has_subparts(),
            _ => false,
        },
    )
}

/// Every attachment-flagged part, at any depth, in document order.
pub fn collect_attachment_parts(tree: &PartTree, start: PartId) -> Vec<PartId> {
    collect(tree, start, &|_| true, &|part| part.is_attachment())
}

/// Concatenated text of all non-attachment text and alternative parts.
pub fn plain_text_content(tree: &PartTree) -> String {
    collect(tree, tree.root(), &|_| true, &|part| {
        !part.is_attachment() && matches!(part.tag(), PartTag::Text | PartTag::Alternative)
    })
    .into_iter()
    .map(|id| tree.part(id).text())
    .collect()
}

/// Concatenated HTML of all HTML and alternative parts.
pub fn html_content(tree: &PartTree) -> String {
    collect(tree, tree.root(), &|_| true, &|part| {
        matches!(part.tag(), PartTag::Html | PartTag::Alternative)
    })
    .into_iter()
    .map(|id| {
        let part = tree.part(id);
        match part.tag() {
            PartTag::Alternative => part.html_content(),
            _ => part.text(),
        }
    })
    .collect()
}

/// Feed every certificate part to the engine's import.
pub fn import_certificates(engine: &CryptoEngine, tree: &PartTree) -> Vec<ImportResult> {
    let mut results = Vec::new();
    for id in tree.descendants(tree.root()) {
        let part = tree.part(id);
        let (PartKind::Cert { protocol }, Some(node)) = (part.kind(), part.node()) else {
            continue;
        };
        match engine.import_key(*protocol, node.decoded_content()) {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!(%protocol, error = %e, "Failed to import certificate"),
        }
    }
    results
}

/// Replace `src="cid:…"` references with inline `data:` URIs built from
/// the image node carrying that Content-ID.
///
/// Nodes are looked up in `root` and in every node synthesized while
/// parsing (decrypted content). Non-image and empty targets are left alone.
pub fn resolve_cid_links(root: &Arc<Node>, tree: &PartTree, html: &str) -> String {
    let regex = match CID_SRC.as_ref() {
        Ok(regex) => regex,
        Err(e) => {
            tracing::error!(error = %e, "Invalid cid pattern");
            return html.to_string();
        }
    };

    regex
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str()).to_string();
            let link = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            let cid = link.trim_start_matches("cid:");
            let Some(node) = find_content_id(root, tree, cid) else {
                tracing::warn!(cid, "Failed to find referenced attachment");
                return whole;
            };
            let mime = node.mime_type();
            if !mime.starts_with("image/") {
                return whole;
            }
            let data = node.decoded_content();
            if data.is_empty() {
                tracing::warn!(cid, "Referenced attachment is empty");
                return whole;
            }
            let encoded = base64::engine::general_purpose::STANDARD.encode(data);
            format!("src=\"data:{mime};base64,{encoded}\"")
        })
        .into_owned()
}

fn find_content_id(root: &Arc<Node>, tree: &PartTree, cid: &str) -> Option<Arc<Node>> {
    find_node(root, &|n| n.content_id().as_deref() == Some(cid)).or_else(|| {
        tree.descendants(tree.root())
            .into_iter()
            .flat_map(|id| tree.get(id).owned_nodes().iter())
            .find_map(|owned| find_node(owned, &|n| n.content_id().as_deref() == Some(cid)))
    })
}

/// Depth-first search through children and embedded messages.
pub fn find_node(node: &Arc<Node>, select: &dyn Fn(&Node) -> bool) -> Option<Arc<Node>> {
    if select(node) {
        return Some(Arc::clone(node));
    }
    node.children()
        .iter()
        .chain(node.encapsulated())
        .find_map(|child| find_node(child, select))
}

/// Indented dump of the node tree followed by the part tree.
pub fn structure_as_string(root: &Node, tree: &PartTree) -> String {
    let mut out = String::new();
    print_node(&mut out, root, 0);
    print_part(&mut out, tree.part(tree.root()), 0);
    out
}

fn print_node(out: &mut String, node: &Node, depth: usize) {
    let _ = writeln!(
        out,
        "{:indent$}! {} isAttachment: {}",
        "",
        node.mime_type(),
        node.is_attachment(),
        indent = depth
    );
    for child in node.children().iter().chain(node.encapsulated()) {
        print_node(out, child, depth + 1);
    }
}

fn print_part(out: &mut String, part: PartRef<'_>, depth: usize) {
    let _ = write!(
        out,
        "{:indent$}# {} isAttachment: {}",
        "",
        part.tag(),
        part.is_attachment(),
        indent = depth
    );
    let mime = part.mime_type();
    if !mime.is_empty() {
        let _ = write!(out, " mime: {mime}");
    }
    let enc = part.encryption_state();
    let sig = part.signature_state();
    if enc.is_encrypted() || sig.is_signed() {
        let _ = write!(out, " encryption: {enc:?} signature: {sig:?}");
    }
    if part.error().is_error() {
        let _ = write!(out, " error: {:?}", part.error());
    }
    out.push('\n');

    if let PartKind::Alternative { modes } = part.kind() {
        for (mode, &id) in modes {
            let _ = writeln!(out, "{:indent$}~ {mode:?}", "", indent = depth + 1);
            print_part(out, part.tree().part(id), depth + 2);
        }
    }
    for sub in part.subparts() {
        print_part(out, sub, depth + 1);
    }
}

//! Body part formatters: one per media type family.
//!
//! A formatter turns a structural node into zero or more parts. Returning
//! nothing hands the node to the next formatter (or to the `*` subtype and
//! finally to default handling).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crypto::Protocol;
use crate::model::metadata::{EncryptionState, SignatureState};
use crate::model::node::{Node, NodeBuilder};
use crate::model::part::{AlternativeMode, EncryptedData, Part, PartId, PartKind, SignedData};

use super::armor::{self, ArmorBlock, ArmorKind};
use super::header::decode_charset;
use super::mime::crlf_to_lf;
use super::tree::ParseContext;

/// Turns a node into parts.
pub trait BodyPartFormatter: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &'static str;

    /// Produce the parts for `node`. `parent` is the node whose children
    /// `node` belongs to, if any.
    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        parent: Option<&Arc<Node>>,
    ) -> Vec<PartId>;
}

/// First direct child of `node` with the given mime type, with its index.
fn find_child(node: &Node, mime_type: &str) -> Option<(usize, Arc<Node>)> {
    node.children()
        .iter()
        .enumerate()
        .find(|(_, child)| child.is_mime_type(mime_type))
        .map(|(i, child)| (i, Arc::clone(child)))
}

fn lf_text(text: String) -> String {
    if text.contains("\r\n") {
        text.replace("\r\n", "\n")
    } else {
        text
    }
}

// ── Leaf formatters ────────────────────────────────────────────

/// Claims nothing; lets default handling turn the node into an attachment.
pub struct AnyTypeFormatter;

impl BodyPartFormatter for AnyTypeFormatter {
    fn name(&self) -> &'static str {
        "any"
    }

    fn process(&self, _: &mut ParseContext<'_>, _: &Arc<Node>, _: Option<&Arc<Node>>) -> Vec<PartId> {
        Vec::new()
    }
}

/// `text/plain` and friends, with inline OpenPGP armor.
pub struct TextPlainFormatter;

impl BodyPartFormatter for TextPlainFormatter {
    fn name(&self) -> &'static str {
        "text/plain"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        if node.is_attachment() {
            return vec![ctx.attachment(node)];
        }
        vec![text_part(ctx, node)]
    }
}

/// Overall inline state of a sequence of armor blocks.
///
/// Plain text before or between armored blocks makes the state partial;
/// trailing plain text (a footer added by a mailing list) does not.
fn inline_states(blocks: &[ArmorBlock<'_>]) -> (SignatureState, EncryptionState) {
    let mut signature = SignatureState::NotSigned;
    let mut encryption = EncryptionState::NotEncrypted;
    let mut fully = true;
    let mut text_seen = false;

    for block in blocks {
        if text_seen {
            fully = false;
        }
        match block.kind {
            ArmorKind::Message => encryption = EncryptionState::PartiallyEncrypted,
            ArmorKind::ClearSigned => signature = SignatureState::PartiallySigned,
            _ if !block.is_blank() => text_seen = true,
            _ => {}
        }
    }

    if fully {
        if signature == SignatureState::PartiallySigned {
            signature = SignatureState::FullySigned;
        }
        if encryption == EncryptionState::PartiallyEncrypted {
            encryption = EncryptionState::FullyEncrypted;
        }
    }
    (signature, encryption)
}

fn text_part(ctx: &mut ParseContext<'_>, node: &Arc<Node>) -> PartId {
    let blocks = armor::split(node.decoded_content());
    let (signature_state, encryption_state) = inline_states(&blocks);
    let id = ctx.alloc(Part::new(
        PartKind::Text {
            signature_state,
            encryption_state,
        },
        Some(Arc::clone(node)),
    ));

    for block in &blocks {
        let part = match block.kind {
            ArmorKind::Message => {
                let content = armored_node(node, block.text());
                let mut part = Part::new(
                    PartKind::Encrypted(EncryptedData {
                        protocol: Protocol::OpenPgp,
                        ciphertext: Some(Arc::clone(&content)),
                        parse_after: false,
                        decrypted: Vec::new(),
                    }),
                    Some(Arc::clone(&content)),
                );
                part.metadata_mut().is_encrypted = true;
                part.bind_lifetime(content);
                part
            }
            ArmorKind::ClearSigned => {
                let content = armored_node(node, block.text());
                let mut part = Part::new(
                    PartKind::Signed(SignedData {
                        protocol: Protocol::OpenPgp,
                        signed_data: Some(Arc::clone(&content)),
                        parse_after: false,
                    }),
                    None,
                );
                part.bind_lifetime(content);
                part
            }
            _ if block.is_blank() => continue,
            kind => {
                if kind != ArmorKind::PlainText {
                    tracing::debug!(?kind, "Keeping armor block as text");
                }
                let text = decode_charset(node.content_charset(), &crlf_to_lf(block.text()));
                Part::message(text)
            }
        };
        ctx.tree_mut().push_child(id, part);
    }
    id
}

/// A `text/plain` node holding one armored block, in the charset of `source`.
fn armored_node(source: &Node, block: &[u8]) -> Arc<Node> {
    NodeBuilder::new("text/plain")
        .param("charset", source.charset())
        .body_charset(source.content_charset())
        .body(block.to_vec())
        .raw(block.to_vec())
        .build_detached()
}

pub struct HtmlFormatter;

impl BodyPartFormatter for HtmlFormatter {
    fn name(&self) -> &'static str {
        "text/html"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        let part = Part::new(PartKind::Html, Some(Arc::clone(node)))
            .with_text(lf_text(node.decoded_text()));
        vec![ctx.alloc(part)]
    }
}

pub struct HeadersFormatter;

impl BodyPartFormatter for HeadersFormatter {
    fn name(&self) -> &'static str {
        "text/rfc822-headers"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        vec![ctx.alloc(Part::new(PartKind::Headers, Some(Arc::clone(node))))]
    }
}

/// `message/rfc822`: the embedded message is parsed below the part.
pub struct EncapsulatedFormatter;

impl BodyPartFormatter for EncapsulatedFormatter {
    fn name(&self) -> &'static str {
        "message/rfc822"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        let id = ctx.alloc(Part::new(PartKind::Encapsulated, Some(Arc::clone(node))));
        match node.encapsulated() {
            Some(message) => {
                let message = Arc::clone(message);
                ctx.parse_into(id, &message);
            }
            None => tracing::warn!("message/rfc822 node without an embedded message"),
        }
        vec![id]
    }
}

// ── Multipart formatters ───────────────────────────────────────

/// `multipart/mixed` and any unknown multipart subtype.
pub struct MixedFormatter;

impl BodyPartFormatter for MixedFormatter {
    fn name(&self) -> &'static str {
        "multipart/mixed"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        if node.children().is_empty() {
            return Vec::new();
        }
        // The intermediate part keeps the multipart headers reachable
        // (protected headers live there).
        let id = ctx.alloc(Part::new(PartKind::Message, Some(Arc::clone(node))));
        let list = ctx.mime_part(node, 0, false);
        ctx.tree_mut().append_child(id, list);
        vec![id]
    }
}

/// `multipart/related`: the root part plus every attachment, in order.
pub struct RelatedFormatter;

impl BodyPartFormatter for RelatedFormatter {
    fn name(&self) -> &'static str {
        "multipart/related"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        let children = node.children();
        if children.is_empty() {
            return Vec::new();
        }
        let mut list = vec![ctx.mime_part(node, 0, true)];
        for (i, child) in children.iter().enumerate().skip(1) {
            if child.is_attachment() {
                list.push(ctx.mime_part(node, i, true));
            }
        }
        list
    }
}

pub struct AlternativeFormatter;

impl BodyPartFormatter for AlternativeFormatter {
    fn name(&self) -> &'static str {
        "multipart/alternative"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        if node.children().is_empty() {
            return Vec::new();
        }

        let id = ctx.alloc(Part::new(
            PartKind::Alternative {
                modes: BTreeMap::new(),
            },
            Some(Arc::clone(node)),
        ));
        let mut modes = BTreeMap::new();

        if let Some((i, _)) = find_child(node, "text/calendar") {
            modes.insert(AlternativeMode::ICal, ctx.mime_part(node, i, true));
        }
        if let Some((i, _)) = find_child(node, "text/plain") {
            modes.insert(AlternativeMode::Plain, ctx.mime_part(node, i, true));
        }
        if let Some((i, _)) = find_child(node, "text/html") {
            modes.insert(AlternativeMode::Html, ctx.mime_part(node, i, true));
        } else if let Some((_, group)) =
            find_child(node, "multipart/related").or_else(|| find_child(node, "multipart/mixed"))
        {
            // HTML with inline images: the HTML sits one level down.
            modes.insert(AlternativeMode::Html, related_html(ctx, id, &group));
        }

        if modes.is_empty() {
            return vec![ctx.mime_part(node, 0, false)];
        }
        *ctx.tree_mut().get_mut(id).kind_mut() = PartKind::Alternative { modes };
        vec![id]
    }
}

/// Collect the HTML children of `group` into one message part and hang the
/// group's attachments below `alternative`.
fn related_html(ctx: &mut ParseContext<'_>, alternative: PartId, group: &Arc<Node>) -> PartId {
    let html = ctx.alloc(Part::message(String::new()));
    let mut text = String::new();
    for (i, child) in group.children().iter().enumerate() {
        if child.is_mime_type("text/html") {
            let list = ctx.mime_part(group, i, true);
            text.push_str(&ctx.tree().part(list).text());
            ctx.tree_mut().adopt_children(html, list);
        } else if child.is_attachment() {
            let list = ctx.mime_part(group, i, true);
            ctx.tree_mut().append_child(alternative, list);
        }
    }
    ctx.tree_mut().get_mut(html).set_text(text);
    html
}

// ── Crypto formatters ──────────────────────────────────────────

/// `multipart/encrypted` (RFC 1847 / RFC 3156).
pub struct EncryptedFormatter;

impl BodyPartFormatter for EncryptedFormatter {
    fn name(&self) -> &'static str {
        "multipart/encrypted"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        if node.children().is_empty() {
            return Vec::new();
        }

        let found = find_child(node, "application/octet-stream")
            .map(|(_, data)| (Protocol::OpenPgp, data))
            .or_else(|| {
                find_child(node, "application/pkcs7-mime").map(|(_, data)| (Protocol::Cms, data))
            });
        let Some((protocol, data)) = found else {
            tracing::debug!("multipart/encrypted without a payload, parsing as mixed");
            return vec![ctx.mime_part(node, 0, false)];
        };

        vec![ctx.alloc(encrypted_part(protocol, node, Some(data)))]
    }
}

fn encrypted_part(protocol: Protocol, node: &Arc<Node>, data: Option<Arc<Node>>) -> Part {
    let text = data.as_ref().unwrap_or(node).decoded_text();
    let mut part = Part::new(
        PartKind::Encrypted(EncryptedData {
            protocol,
            ciphertext: data,
            parse_after: true,
            decrypted: Vec::new(),
        }),
        Some(Arc::clone(node)),
    )
    .with_text(text);
    part.metadata_mut().is_encrypted = true;
    part
}

/// `application/pgp-encrypted` reached on its own (outside a well-formed
/// `multipart/encrypted`).
pub struct PgpEncryptedFormatter;

impl BodyPartFormatter for PgpEncryptedFormatter {
    fn name(&self) -> &'static str {
        "application/pgp-encrypted"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        parent: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        let version = String::from_utf8_lossy(node.decoded_content());
        if version.trim() != "Version: 1" {
            tracing::warn!(version = %version.trim(), "Unknown PGP version string");
        }

        let Some(parent) = parent else {
            return Vec::new();
        };
        let Some((_, data)) = find_child(parent, "application/octet-stream") else {
            return Vec::new();
        };
        vec![ctx.alloc(encrypted_part(Protocol::OpenPgp, node, Some(data)))]
    }
}

/// `application/pkcs7-mime`: enveloped data, opaque signed data or a
/// certificate bundle depending on `smime-type`.
pub struct Pkcs7Formatter;

impl BodyPartFormatter for Pkcs7Formatter {
    fn name(&self) -> &'static str {
        "application/pkcs7-mime"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        if !node.has_headers() {
            return Vec::new();
        }

        let smime_type = node.param("smime-type").unwrap_or_default().to_ascii_lowercase();
        let part = match smime_type.as_str() {
            "certs-only" => Part::new(
                PartKind::Cert {
                    protocol: Protocol::Cms,
                },
                Some(Arc::clone(node)),
            ),
            "signed-data" => {
                tracing::debug!("pkcs7 opaque signed data");
                Part::new(
                    PartKind::Signed(SignedData {
                        protocol: Protocol::Cms,
                        signed_data: Some(Arc::clone(node)),
                        parse_after: true,
                    }),
                    None,
                )
            }
            other => {
                tracing::debug!(smime_type = other, "pkcs7 enveloped data");
                encrypted_part(Protocol::Cms, node, None)
            }
        };
        vec![ctx.alloc(part)]
    }
}

/// `multipart/signed` (RFC 1847): signed data plus a detached signature.
pub struct SignedFormatter;

impl SignedFormatter {
    fn detect_protocol(protocol: &str, signature_type: &str) -> Option<Protocol> {
        let declared = if protocol.is_empty() {
            tracing::warn!(
                signature_type,
                "multipart/signed without protocol, using the signature's content type"
            );
            signature_type
        } else {
            protocol
        };
        match declared {
            "application/pkcs7-signature" | "application/x-pkcs7-signature" => Some(Protocol::Cms),
            "application/pgp-signature" | "application/x-pgp-signature" => Some(Protocol::OpenPgp),
            _ => None,
        }
    }
}

impl BodyPartFormatter for SignedFormatter {
    fn name(&self) -> &'static str {
        "multipart/signed"
    }

    fn process(
        &self,
        ctx: &mut ParseContext<'_>,
        node: &Arc<Node>,
        _: Option<&Arc<Node>>,
    ) -> Vec<PartId> {
        let children = node.children();
        if children.len() != 2 {
            tracing::debug!(
                children = children.len(),
                "multipart/signed needs exactly two children, showing the first"
            );
            if children.is_empty() {
                return Vec::new();
            }
            return vec![ctx.mime_part(node, 0, true)];
        }

        let signed_data = Arc::clone(&children[0]);
        let signature = Arc::clone(&children[1]);
        let protocol = node.param("protocol").unwrap_or_default().to_ascii_lowercase();
        let Some(protocol) = Self::detect_protocol(&protocol, &signature.mime_type()) else {
            return vec![ctx.mime_part(node, 0, false)];
        };

        let part = Part::new(
            PartKind::Signed(SignedData {
                protocol,
                signed_data: Some(signed_data),
                parse_after: true,
            }),
            Some(signature),
        );
        vec![ctx.alloc(part)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Disposition;
    use crate::model::part::{PartKind, PartTag, PartTree};
    use crate::parser::tree::ObjectTreeParser;

    fn parse(root: NodeBuilder) -> PartTree {
        ObjectTreeParser::new().parse(&root.build())
    }

    fn find(tree: &PartTree, tag: PartTag) -> Vec<PartId> {
        tree.descendants(tree.root())
            .into_iter()
            .filter(|&id| tree.part(id).tag() == tag)
            .collect()
    }

    const ARMORED: &str = "-----BEGIN PGP MESSAGE-----\n\nhQEMA\n-----END PGP MESSAGE-----\n";

    #[test]
    fn test_inline_armor_fully_encrypted() {
        let tree = parse(NodeBuilder::new("text/plain").body(ARMORED));
        let text = find(&tree, PartTag::Text)[0];
        let view = tree.part(text);
        assert_eq!(view.encryption_state(), EncryptionState::FullyEncrypted);
        let encrypted = find(&tree, PartTag::Encrypted);
        assert_eq!(encrypted.len(), 1);
        let part = tree.get(encrypted[0]);
        assert_eq!(part.owned_nodes().len(), 1);
        assert!(matches!(
            part.kind(),
            PartKind::Encrypted(EncryptedData { parse_after: false, .. })
        ));
    }

    #[test]
    fn test_leading_text_makes_armor_partial() {
        let body = format!("Hi there\n{ARMORED}");
        let tree = parse(NodeBuilder::new("text/plain").body(body));
        let text = find(&tree, PartTag::Text)[0];
        assert_eq!(
            tree.part(text).encryption_state(),
            EncryptionState::PartiallyEncrypted
        );
        let kids: Vec<_> = tree.part(text).subparts().map(|p| p.tag()).collect();
        assert_eq!(kids, vec![PartTag::Message, PartTag::Encrypted]);
    }

    #[test]
    fn test_trailing_footer_keeps_fully_signed() {
        let body = "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\nhello\n\
                    -----BEGIN PGP SIGNATURE-----\n\nabc\n-----END PGP SIGNATURE-----\n\
                    -- \nmailing list footer\n";
        let tree = parse(NodeBuilder::new("text/plain").body(body));
        let text = find(&tree, PartTag::Text)[0];
        assert_eq!(tree.part(text).signature_state(), SignatureState::FullySigned);
        let signed = find(&tree, PartTag::Signed)[0];
        assert!(tree.part(signed).node().is_none());
    }

    #[test]
    fn test_text_attachment() {
        let tree = parse(
            NodeBuilder::new("multipart/mixed")
                .child(NodeBuilder::new("text/plain").body("body"))
                .child(
                    NodeBuilder::new("text/plain")
                        .disposition(Disposition::Attachment)
                        .filename("notes.txt")
                        .body("notes"),
                ),
        );
        let attachments = find(&tree, PartTag::Attachment);
        assert_eq!(attachments.len(), 1);
        assert_eq!(tree.part(attachments[0]).text(), "notes");
    }

    #[test]
    fn test_html_normalises_line_endings() {
        let tree = parse(NodeBuilder::new("text/html").body("<p>a</p>\r\n<p>b</p>"));
        let html = find(&tree, PartTag::Html)[0];
        assert_eq!(tree.part(html).text(), "<p>a</p>\n<p>b</p>");
    }

    #[test]
    fn test_mixed_keeps_header_wrapper() {
        let tree = parse(
            NodeBuilder::new("multipart/mixed")
                .child(NodeBuilder::new("text/plain").body("one"))
                .child(NodeBuilder::new("text/plain").body("two")),
        );
        let root_kids: Vec<_> = tree.part(tree.root()).subparts().map(|p| p.tag()).collect();
        assert_eq!(root_kids, vec![PartTag::Message]);
        assert_eq!(find(&tree, PartTag::Text).len(), 2);
        assert_eq!(tree.part(tree.root()).text(), "");
    }

    #[test]
    fn test_empty_multipart_is_attachment() {
        let tree = parse(NodeBuilder::new("multipart/mixed"));
        assert_eq!(find(&tree, PartTag::Attachment).len(), 1);
    }

    #[test]
    fn test_related_skips_inline_images() {
        let tree = parse(
            NodeBuilder::new("multipart/related")
                .child(NodeBuilder::new("text/html").body("<img src=\"cid:logo\">"))
                .child(
                    NodeBuilder::new("image/png")
                        .header("content-id", "<logo>")
                        .disposition(Disposition::Inline)
                        .body(vec![0x89u8, b'P']),
                )
                .child(
                    NodeBuilder::new("application/pdf")
                        .disposition(Disposition::Attachment)
                        .filename("doc.pdf")
                        .body("pdf"),
                ),
        );
        assert_eq!(find(&tree, PartTag::Html).len(), 1);
        let attachments = find(&tree, PartTag::Attachment);
        assert_eq!(attachments.len(), 1);
        assert_eq!(tree.part(attachments[0]).filename(), Some("doc.pdf"));
    }

    #[test]
    fn test_alternative_modes() {
        let tree = parse(
            NodeBuilder::new("multipart/alternative")
                .child(NodeBuilder::new("text/plain").body("plain"))
                .child(NodeBuilder::new("text/html").body("<b>html</b>")),
        );
        let alt = find(&tree, PartTag::Alternative)[0];
        let view = tree.part(alt);
        assert_eq!(view.text(), "plain");
        assert_eq!(view.html_content(), "<b>html</b>");
        assert!(view.is_html());
        assert_eq!(
            view.available_modes(),
            vec![AlternativeMode::Plain, AlternativeMode::Html]
        );
    }

    #[test]
    fn test_alternative_html_inside_related() {
        let tree = parse(
            NodeBuilder::new("multipart/alternative")
                .child(NodeBuilder::new("text/plain").body("plain"))
                .child(
                    NodeBuilder::new("multipart/related")
                        .child(NodeBuilder::new("text/html").body("<p>rich</p>"))
                        .child(
                            NodeBuilder::new("image/png")
                                .disposition(Disposition::Attachment)
                                .filename("img.png")
                                .body(vec![1u8, 2]),
                        ),
                ),
        );
        let alt = find(&tree, PartTag::Alternative)[0];
        let view = tree.part(alt);
        assert_eq!(view.html_content(), "<p>rich</p>");
        let kids: Vec<_> = view.subparts().collect();
        assert_eq!(kids.len(), 1);
        assert_eq!(
            kids[0].subparts().next().map(|p| p.tag()),
            Some(PartTag::Attachment)
        );
    }

    #[test]
    fn test_alternative_without_known_modes() {
        let tree = parse(
            NodeBuilder::new("multipart/alternative")
                .child(NodeBuilder::new("application/x-foo").body("a"))
                .child(NodeBuilder::new("application/x-bar").body("b")),
        );
        assert!(find(&tree, PartTag::Alternative).is_empty());
        assert_eq!(find(&tree, PartTag::Attachment).len(), 2);
    }

    #[test]
    fn test_encrypted_detects_openpgp() {
        let tree = parse(
            NodeBuilder::new("multipart/encrypted")
                .param("protocol", "application/pgp-encrypted")
                .child(NodeBuilder::new("application/pgp-encrypted").body("Version: 1\n"))
                .child(NodeBuilder::new("application/octet-stream").body(ARMORED)),
        );
        let encrypted = find(&tree, PartTag::Encrypted);
        assert_eq!(encrypted.len(), 1);
        let part = tree.get(encrypted[0]);
        match part.kind() {
            PartKind::Encrypted(data) => {
                assert_eq!(data.protocol, Protocol::OpenPgp);
                assert!(data.ciphertext.is_some());
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(part.metadata().is_encrypted);
        assert_eq!(part.node().map(|n| n.mime_type()).as_deref(), Some("multipart/encrypted"));
    }

    #[test]
    fn test_pkcs7_variants() {
        let certs = parse(
            NodeBuilder::new("application/pkcs7-mime")
                .param("smime-type", "certs-only")
                .header("content-type", "application/pkcs7-mime; smime-type=certs-only")
                .body("c"),
        );
        assert_eq!(find(&certs, PartTag::Cert).len(), 1);

        let signed = parse(
            NodeBuilder::new("application/pkcs7-mime")
                .param("smime-type", "signed-data")
                .header("content-type", "application/pkcs7-mime; smime-type=signed-data")
                .body("s"),
        );
        let id = find(&signed, PartTag::Signed)[0];
        assert!(signed.part(id).node().is_none());
    }

    #[test]
    fn test_signed_protocol_from_signature_type() {
        let tree = parse(
            NodeBuilder::new("multipart/signed")
                .child(NodeBuilder::new("text/plain").body("signed"))
                .child(NodeBuilder::new("application/pgp-signature").body("sig")),
        );
        let id = find(&tree, PartTag::Signed)[0];
        match tree.get(id).kind() {
            PartKind::Signed(data) => assert_eq!(data.protocol, Protocol::OpenPgp),
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(
            tree.part(id).node().map(|n| n.mime_type()).as_deref(),
            Some("application/pgp-signature")
        );
    }

    #[test]
    fn test_signed_with_wrong_arity_shows_first_child() {
        let tree = parse(
            NodeBuilder::new("multipart/signed")
                .param("protocol", "application/pgp-signature")
                .child(NodeBuilder::new("text/plain").body("first"))
                .child(NodeBuilder::new("text/plain").body("second"))
                .child(NodeBuilder::new("application/pgp-signature").body("sig")),
        );
        assert!(find(&tree, PartTag::Signed).is_empty());
        assert_eq!(tree.part(tree.root()).text(), "first");
    }

    #[test]
    fn test_signed_with_single_child_shows_it() {
        let tree = parse(
            NodeBuilder::new("multipart/signed")
                .param("protocol", "application/pgp-signature")
                .child(NodeBuilder::new("text/plain").body("lonely")),
        );
        assert!(find(&tree, PartTag::Signed).is_empty());
        assert_eq!(tree.part(tree.root()).text(), "lonely");
    }

    #[test]
    fn test_pgp_encrypted_needs_ciphertext_sibling() {
        let with_data = parse(
            NodeBuilder::new("multipart/mixed")
                .child(NodeBuilder::new("application/pgp-encrypted").body("Version: 1\n"))
                .child(NodeBuilder::new("application/octet-stream").body(ARMORED)),
        );
        let encrypted = find(&with_data, PartTag::Encrypted);
        assert_eq!(encrypted.len(), 1);
        match with_data.get(encrypted[0]).kind() {
            PartKind::Encrypted(data) => {
                assert_eq!(data.protocol, Protocol::OpenPgp);
                assert_eq!(
                    data.ciphertext.as_ref().map(|n| n.mime_type()).as_deref(),
                    Some("application/octet-stream")
                );
            }
            other => panic!("unexpected kind {other:?}"),
        }

        let alone = parse(
            NodeBuilder::new("multipart/mixed")
                .child(NodeBuilder::new("application/pgp-encrypted").body("Version: 1\n")),
        );
        assert!(find(&alone, PartTag::Encrypted).is_empty());
    }

    #[test]
    fn test_signed_unknown_protocol_parses_children() {
        let tree = parse(
            NodeBuilder::new("multipart/signed")
                .param("protocol", "application/x-unknown")
                .child(NodeBuilder::new("text/plain").body("data"))
                .child(NodeBuilder::new("application/x-unknown").body("sig")),
        );
        assert!(find(&tree, PartTag::Signed).is_empty());
        assert_eq!(find(&tree, PartTag::Text).len(), 1);
        assert_eq!(find(&tree, PartTag::Attachment).len(), 1);
    }

    #[test]
    fn test_encapsulated_message() {
        let tree = parse(
            NodeBuilder::new("multipart/mixed")
                .child(NodeBuilder::new("text/plain").body("see attached"))
                .child(
                    NodeBuilder::new("message/rfc822").encapsulated(
                        NodeBuilder::new("text/plain")
                            .header("from", "Alice <alice@example.org>")
                            .body("inner"),
                    ),
                ),
        );
        let id = find(&tree, PartTag::Encapsulated)[0];
        let view = tree.part(id);
        assert_eq!(view.text(), "inner");
        assert_eq!(view.from().as_deref(), Some("Alice <alice@example.org>"));
        assert!(view.metadata().is_encapsulated_rfc822);
    }
}

//! Integration tests for loading, parsing and querying messages without crypto.

mod common;

use common::fixture;
use mimetree::model::metadata::{SecurityLevel, SignatureState};
use mimetree::model::part::PartTag;
use mimetree::parser::eml::load_eml;
use mimetree::parser::header::{decode_encoded_words, parse_date};
use mimetree::parser::ObjectTreeParser;
use mimetree::render::MessageParser;

// ─── Test 1: Plain message headers and body ─────────────────────────

#[test]
fn test_plain_message_summary() {
    let message = MessageParser::new()
        .parse_file(fixture("plain.eml"))
        .unwrap();
    let summary = message.summary();
    assert_eq!(summary.subject, "Café mañana");
    assert_eq!(summary.from.display_name, "José García");
    assert_eq!(summary.from.address, "jose@example.com");
    assert!(summary.date.is_some());
    assert!(
        summary.text.contains("cafetería"),
        "Expected decoded quoted-printable body, got: '{}'",
        summary.text
    );
    assert!(summary.html.is_none());
    assert!(summary.attachments.is_empty());
    assert_eq!(summary.security, SecurityLevel::Unknown);
}

// ─── Test 2: Attachments at every depth, in document order ──────────

#[test]
fn test_attachments_in_document_order() {
    let message = MessageParser::new()
        .parse_file(fixture("mixed_attachments.eml"))
        .unwrap();
    let attachments = message.attachments();
    let names: Vec<&str> = attachments.iter().map(|a| a.display_name()).collect();
    assert_eq!(names, vec!["q3.pdf", "chart.png", "raw data.zip"]);
    assert_eq!(attachments[0].content_type, "application/pdf");
    assert_eq!(attachments[0].size, 9);
    assert_eq!(attachments[1].size, 8);
    assert!(attachments.iter().all(|a| !a.is_inline));

    let text = message.text();
    assert!(text.contains("Numbers are attached."));
    assert!(text.contains("Charts below."));
}

// ─── Test 3: Alternative with related HTML and cid image ────────────

#[test]
fn test_alternative_related_html() {
    let message = MessageParser::new()
        .parse_file(fixture("alternative_related.eml"))
        .unwrap();

    let content = message.content_parts();
    assert_eq!(content.len(), 1);
    assert_eq!(content[0].tag(), PartTag::Alternative);
    assert!(content[0].is_html());

    assert_eq!(message.text().trim_end(), "Plain newsletter.");
    let html = message.html().unwrap();
    assert!(html.contains("HTML newsletter"));
    assert!(
        html.contains("src=\"data:image/png;base64,iVBORw0KGgo=\""),
        "cid link not resolved: {html}"
    );
    assert!(!html.contains("cid:"));

    let attachments = message.attachments();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].display_name(), "logo.png");
    assert_eq!(attachments[0].content_id.as_deref(), Some("logo@example.com"));
    assert!(attachments[0].is_inline);
}

// ─── Test 4: Calendar alternative ───────────────────────────────────

#[test]
fn test_calendar_alternative() {
    let message = MessageParser::new()
        .parse_file(fixture("calendar.eml"))
        .unwrap();
    let content = message.content_parts();
    assert_eq!(content.len(), 1);
    let alternative = content[0];
    assert!(!alternative.is_html());
    assert!(alternative.ical_content().contains("METHOD:REQUEST"));
    assert_eq!(
        alternative.html_content().trim_end(),
        "You are invited to Planning."
    );
    assert!(message.html().is_none());
}

// ─── Test 5: Forwarded message is an encapsulated part ──────────────

#[test]
fn test_forwarded_message() {
    let message = MessageParser::new()
        .parse_file(fixture("forwarded.eml"))
        .unwrap();
    let tags: Vec<PartTag> = message.content_parts().iter().map(|p| p.tag()).collect();
    assert_eq!(tags, vec![PartTag::Text, PartTag::Encapsulated]);

    let encapsulated = message.content_parts()[1];
    assert_eq!(encapsulated.from().as_deref(), Some("Luis <luis@example.com>"));
    assert!(encapsulated.date().is_some());
    assert!(encapsulated.text().contains("Lunch at noon?"));

    // The embedded message itself is offered as an attachment.
    assert_eq!(message.attachments().len(), 1);
}

// ─── Test 6: Signed message without crypto still renders ────────────

#[test]
fn test_signed_message_without_crypto() {
    let message = MessageParser::new()
        .parse_file(fixture("pgp_signed.eml"))
        .unwrap();
    assert_eq!(message.text().trim_end(), "This text is signed.");
    assert_eq!(
        message.signature_status().as_deref(),
        Some("Signature not verified.")
    );
    let first = message.content_parts()[0];
    assert_eq!(first.signature_state(), SignatureState::NotSigned);
    assert_eq!(message.security_level(), SecurityLevel::Unknown);
}

// ─── Test 7: Encrypted message without crypto stays closed ──────────

#[test]
fn test_encrypted_message_without_crypto() {
    let message = MessageParser::new()
        .parse_file(fixture("pgp_encrypted.eml"))
        .unwrap();
    let content = message.content_parts();
    assert!(content.iter().all(|p| p.tag() != PartTag::Text));
    assert!(!message.text().contains("BEGIN PGP MESSAGE"));
    assert!(message.attachments().is_empty());
}

// ─── Test 8: Structure dump ─────────────────────────────────────────

#[test]
fn test_structure_dump() {
    let message = MessageParser::new()
        .parse_file(fixture("mixed_attachments.eml"))
        .unwrap();
    let dump = message.structure();
    let first = dump.lines().next().unwrap();
    assert_eq!(first, "! multipart/mixed isAttachment: false");
    assert!(dump.contains("  ! image/png isAttachment: true"));
    assert!(dump.contains("# attachment isAttachment: true mime: application/zip"));
}

// ─── Test 9: Nesting depth limit ────────────────────────────────────

#[test]
fn test_depth_limit_from_parser() {
    let root = load_eml(fixture("mixed_attachments.eml")).unwrap();
    let tree = ObjectTreeParser::new().with_max_depth(1).parse(&root);
    let has_inner_text = tree
        .descendants(tree.root())
        .into_iter()
        .any(|id| {
            let part = tree.part(id);
            part.tag() == PartTag::Text && part.text().contains("Charts below.")
        });
    assert!(!has_inner_text);
}

// ─── Test 10: Header decoding helpers ───────────────────────────────

#[test]
fn test_header_helpers() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?Q?Caf=C3=A9_con_le=C3=B1a?="),
        "Café con leña"
    );
    let date = parse_date("Mon, 12 Oct 2026 09:30:00 +0200").unwrap();
    assert_eq!(date.to_rfc3339(), "2026-10-12T07:30:00+00:00");
}

// ─── Test 11: Missing file ──────────────────────────────────────────

#[test]
fn test_missing_file() {
    let result = MessageParser::new().parse_file(fixture("does-not-exist.eml"));
    assert!(matches!(
        result,
        Err(mimetree::error::MimeTreeError::FileNotFound(_))
    ));
}

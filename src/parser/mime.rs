//! MIME loading: raw RFC 5322 bytes to a [`Node`] tree, plus HTML-to-text
//! conversion for terminal output.

use std::sync::Arc;

use base64::Engine as _;
use mail_parser::{Message, MessageParser, PartType};

use crate::model::node::{Disposition, Node, NodeBuilder};
use crate::parser::header::{self, parse_structured};

/// Maximum depth for recursive loading (to prevent stack overflow on adversarial input).
pub const MAX_DEPTH: usize = 64;

/// Parse a complete raw message (headers + body) into a structural tree.
///
/// A leading mbox `From ` line and a UTF-8 BOM are skipped and line endings
/// are normalised to LF. Input `mail-parser` cannot make sense of still
/// yields a single `text/plain` node holding whatever follows the header
/// block.
pub fn load_message(raw_message: &[u8]) -> Arc<Node> {
    let data = crlf_to_lf(skip_from_line(raw_message));
    load_entity(&data, 0).build()
}

/// Turn decrypted or armored bytes into a node that can be parsed again.
///
/// Data that starts with a header field and contains a header/body
/// separator is loaded as a full entity; anything else becomes a
/// `text/plain` body. `charset` is used when the data declares none.
pub fn load_body(data: &[u8], charset: &str) -> Arc<Node> {
    let data = crlf_to_lf(data);
    if looks_like_entity(&data) {
        let mut builder = load_entity(&data, 0);
        if builder_charset_missing(&data) {
            builder = builder.param("charset", charset);
        }
        return builder.build_detached();
    }
    NodeBuilder::new("text/plain")
        .param("charset", charset)
        .body(data.clone())
        .raw(data)
        .build_detached()
}

/// Whether the data begins with a header field and has a blank line after the header block.
fn looks_like_entity(data: &[u8]) -> bool {
    if !contains(data, b"\n\n") {
        return false;
    }
    let first_line = data.split(|&b| b == b'\n').next().unwrap_or(&[]);
    match first_line.iter().position(|&b| b == b':') {
        Some(colon) if colon > 0 => first_line[..colon]
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-'),
        _ => false,
    }
}

fn builder_charset_missing(data: &[u8]) -> bool {
    let header_end = find(data, b"\n\n").unwrap_or(data.len());
    let headers = header::unfold_headers(&header::decode_header_bytes(&data[..header_end]));
    header::get_header(&headers, "content-type")
        .map(parse_structured)
        .map_or(true, |ct| ct.param("charset").is_none())
}

/// Load one entity (a full message or a body part with headers).
fn load_entity(data: &[u8], depth: usize) -> NodeBuilder {
    match MessageParser::default().parse(data) {
        Some(msg) if !msg.parts.is_empty() => convert_part(&msg, 0, depth),
        _ => {
            tracing::warn!(len = data.len(), "mail-parser rejected entity, using raw body");
            fallback_entity(data)
        }
    }
}

/// A `text/plain` node holding everything after the header block.
fn fallback_entity(data: &[u8]) -> NodeBuilder {
    let body = match find(data, b"\n\n") {
        Some(pos) => data[pos + 2..].to_vec(),
        None => data.to_vec(),
    };
    NodeBuilder::new("text/plain").body(body).raw(data.to_vec())
}

/// Convert part `id` of a parsed message (and everything below it).
fn convert_part(msg: &Message<'_>, id: usize, depth: usize) -> NodeBuilder {
    let raw_all = msg.raw_message();
    let Some(part) = msg.parts.get(id) else {
        return NodeBuilder::new("text/plain");
    };

    let (start, body_start, end) = (
        part.raw_header_offset(),
        part.raw_body_offset(),
        part.raw_end_offset(),
    );
    let header_bytes = raw_all.get(start..body_start).unwrap_or_default();
    let raw_body = raw_all.get(body_start..end).unwrap_or_default();
    let raw = raw_all.get(start..end).unwrap_or_default();

    let headers = header::unfold_headers(&header::decode_header_bytes(header_bytes));
    let content_type = header::get_header(&headers, "content-type")
        .map(parse_structured)
        .unwrap_or_default();
    let disposition = header::get_header(&headers, "content-disposition").map(parse_structured);

    let mut builder = NodeBuilder::new(&content_type.value)
        .params(content_type.params.clone())
        .raw(raw.to_vec());
    if let Some(cd) = &disposition {
        builder = builder.disposition(Disposition::from_token(&cd.value));
        if let Some(name) = cd.param("filename") {
            builder = builder.filename(name);
        }
    }
    builder = builder.headers(headers.clone());

    if depth >= MAX_DEPTH {
        tracing::warn!(depth, "MIME nesting too deep, keeping part opaque");
        return builder.body(raw_body.to_vec());
    }

    match &part.body {
        PartType::Text(text) | PartType::Html(text) => builder
            .body(text.as_bytes().to_vec())
            .body_charset("utf-8"),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => builder.body(bytes.to_vec()),
        PartType::Message(_) => {
            // The embedded message is re-read from its own bytes so that all
            // offsets below it are relative to a single buffer.
            let payload = decode_transfer(&headers, raw_body);
            let inner = load_entity(&payload, depth + 1);
            builder.body(payload).encapsulated(inner)
        }
        PartType::Multipart(ids) => {
            let entities = content_type
                .param("boundary")
                .map(|b| split_multipart_body(raw_body, b))
                .unwrap_or_default();
            let exact = entities.len() == ids.len();
            for (index, &child_id) in ids.iter().enumerate() {
                let mut child = convert_part(msg, child_id, depth + 1);
                if exact {
                    child = child.raw(entities[index].to_vec());
                }
                builder = builder.child(child);
            }
            builder.body(raw_body.to_vec())
        }
    }
}

/// Undo a base64 transfer encoding on an embedded message (non-conforming but seen in the wild).
fn decode_transfer(headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
    let is_base64 = header::get_header(headers, "content-transfer-encoding")
        .is_some_and(|cte| cte.trim().eq_ignore_ascii_case("base64"));
    if !is_base64 {
        return body.to_vec();
    }
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match base64::engine::general_purpose::STANDARD.decode(&compact) {
        Ok(decoded) => crlf_to_lf(&decoded),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid base64 in message/rfc822 part");
            body.to_vec()
        }
    }
}

/// Split a multipart body into its raw entities.
///
/// The line break before each delimiter belongs to the delimiter, so every
/// entity is exactly the byte range a detached signature covers.
pub fn split_multipart_body<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut entities = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |p| pos + p);
        let line = trim_end(&body[pos..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let closing = rest == b"--";
            if rest.is_empty() || closing {
                if let Some(s) = start {
                    let end = pos.saturating_sub(1).max(s);
                    entities.push(&body[s..end]);
                }
                if closing {
                    return entities;
                }
                start = Some((line_end + 1).min(body.len()));
            }
        }
        pos = line_end + 1;
    }

    // Missing closing delimiter: the last entity runs to the end
    if let Some(s) = start {
        entities.push(&body[s..]);
    }
    entities
}

fn trim_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b' ' | b'\t' | b'\r') {
        end -= 1;
    }
    &line[..end]
}

/// Replace CRLF line endings with LF.
pub fn crlf_to_lf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'\r' && data.get(i + 1) == Some(&b'\n') {
            i += 1;
            continue;
        }
        out.push(data[i]);
        i += 1;
    }
    out
}

/// Replace LF line endings with CRLF (canonical form for signature checks).
pub fn lf_to_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 40);
    let mut prev = 0u8;
    for &b in data {
        if b == b'\n' && prev != b'\r' {
            out.push(b'\r');
        }
        out.push(b);
        prev = b;
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

/// Drop a UTF-8 BOM and an mbox `From ` envelope line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    if !data.starts_with(b"From ") {
        return data;
    }
    match data.iter().position(|&b| b == b'\n') {
        Some(nl) => &data[nl + 1..],
        None => data,
    }
}

/// Elements whose start or end begins a new line in the text rendering.
const BLOCK_TAGS: &[&str] = &[
    "br", "p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre",
    "table", "ul", "ol",
];

/// Elements dropped together with their content.
const HIDDEN_TAGS: &[&str] = &["script", "style", "head", "title"];

/// Render an HTML body as plain text: markup stripped, block elements on
/// their own lines, entities resolved and runs of blank lines collapsed.
pub fn html_to_text(html: &str) -> String {
    let mut raw = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        raw.push_str(&rest[..open]);
        let tag_src = &rest[open + 1..];
        let Some(close) = tag_src.find('>') else {
            rest = "";
            break;
        };
        let name = tag_name(&tag_src[..close]);
        rest = &tag_src[close + 1..];

        if HIDDEN_TAGS.contains(&name.as_str()) && !tag_src.starts_with('/') {
            rest = skip_past_end_tag(rest, &name);
        } else if BLOCK_TAGS.contains(&name.as_str()) {
            raw.push('\n');
        }
    }
    raw.push_str(rest);

    let decoded = decode_entities(&raw);
    let mut out = String::with_capacity(decoded.len());
    let mut blank_run = false;
    for line in decoded.lines().map(str::trim) {
        if line.is_empty() {
            if !blank_run && !out.is_empty() {
                out.push('\n');
            }
            blank_run = true;
        } else {
            out.push_str(line);
            out.push('\n');
            blank_run = false;
        }
    }
    out.trim_end().to_string()
}

/// Lower-cased element name of a tag body such as `/P` or `div class="x"`.
fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Return what follows `</name>` (case-insensitive), or nothing if it is missing.
fn skip_past_end_tag<'a>(html: &'a str, name: &str) -> &'a str {
    let needle = format!("</{name}");
    let lower = html.to_ascii_lowercase();
    lower
        .find(&needle)
        .and_then(|pos| html[pos..].find('>').map(|gt| &html[pos + gt + 1..]))
        .unwrap_or("")
}

/// Resolve the named entities mail bodies use most plus numeric references.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let entity = tail
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| resolve_entity(&tail[1..semi]).map(|c| (c, semi)));
        match entity {
            Some((c, semi)) => {
                out.push(c);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn resolve_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '©',
        "hellip" => '…',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_from_line() {
        let data = b"From user@example.com Thu Jan 01 00:00:00 2024\nSubject: Test\n\nBody\n";
        let result = skip_from_line(data);
        assert!(result.starts_with(b"Subject:"));
    }

    #[test]
    fn test_line_ending_conversion() {
        assert_eq!(crlf_to_lf(b"a\r\nb\r\n"), b"a\nb\n");
        assert_eq!(lf_to_crlf(b"a\nb\r\n"), b"a\r\nb\r\n");
    }

    #[test]
    fn test_split_multipart_body() {
        let body = b"preamble\n--XYZ\nContent-Type: text/plain\n\nfirst\n--XYZ\n\nsecond\n\n--XYZ--\nepilogue\n";
        let parts = split_multipart_body(body, "XYZ");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"Content-Type: text/plain\n\nfirst");
        assert_eq!(parts[1], b"\nsecond\n");
    }

    #[test]
    fn test_load_simple_message() {
        let raw = b"From: a@example.com\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nHello\r\n";
        let node = load_message(raw);
        assert_eq!(node.mime_type(), "text/plain");
        assert!(node.is_root());
        assert_eq!(node.decoded_text().trim_end(), "Hello");
        assert_eq!(node.header("from"), Some("a@example.com"));
    }

    #[test]
    fn test_load_multipart_keeps_raw_entities() {
        let raw = b"Content-Type: multipart/signed; boundary=\"b1\"; protocol=\"application/pgp-signature\"\n\n--b1\nContent-Type: text/plain\n\nsigned text\n--b1\nContent-Type: application/pgp-signature\n\nSIG\n--b1--\n";
        let node = load_message(raw);
        assert_eq!(node.children().len(), 2);
        assert_eq!(
            node.children()[0].encoded_content(),
            b"Content-Type: text/plain\n\nsigned text"
        );
        assert_eq!(node.param("protocol"), Some("application/pgp-signature"));
    }

    #[test]
    fn test_load_body_plain_and_entity() {
        let node = load_body(b"just words\n\nmore words", "iso-8859-1");
        assert_eq!(node.mime_type(), "text/plain");
        assert_eq!(node.charset(), "iso-8859-1");

        let node = load_body(b"Content-Type: text/html\n\n<p>hi</p>\n", "utf-8");
        assert_eq!(node.mime_type(), "text/html");
        assert_eq!(node.charset(), "utf-8");
        assert!(!node.is_root());
    }

    #[test]
    fn test_html_to_text_basic() {
        let html = "<p>Hello <b>world</b></p><p>Second paragraph</p>";
        let text = html_to_text(html);
        assert!(text.contains("Hello world"));
        assert!(text.contains("Second paragraph"));
    }

    #[test]
    fn test_html_to_text_removes_scripts() {
        let html = "Before<SCRIPT type=\"x\">alert('xss')</Script>After";
        assert_eq!(html_to_text(html), "BeforeAfter");
    }

    #[test]
    fn test_html_to_text_entities_and_breaks() {
        let html = "<div>a &amp; b<br/>c &#233;&#x21; &bogus; x</div>";
        assert_eq!(html_to_text(html), "a & b\nc é! &bogus; x");
    }
}

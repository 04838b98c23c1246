//! Inline OpenPGP armor detection.
//!
//! Splits a text body into plain-text runs and `-----BEGIN PGP …-----`
//! regions. Blocks borrow from the input and concatenate back to it
//! byte for byte.

use serde::Serialize;

const BEGIN_PREFIX: &[u8] = b"-----BEGIN PGP ";
const END_PREFIX: &[u8] = b"-----END PGP ";

/// Classification of one block of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArmorKind {
    /// Text outside any armor.
    PlainText,
    /// `PGP MESSAGE`: encrypted or signed-and-compressed data.
    Message,
    /// `PGP MESSAGE, PART x/y`: one piece of a split message.
    MultiPartMessage,
    /// `PGP SIGNATURE` on its own.
    Signature,
    /// `PGP SIGNED MESSAGE` up to its own END marker or the end of its
    /// trailing signature, whichever comes first.
    ClearSigned,
    PublicKey,
    PrivateKey,
    /// A recognized BEGIN marker without a matching END marker.
    Unclassified,
}

impl ArmorKind {
    /// Map an armor header name (`"SIGNED MESSAGE"`) to a block kind.
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "MESSAGE" => Some(Self::Message),
            "SIGNATURE" => Some(Self::Signature),
            "SIGNED MESSAGE" => Some(Self::ClearSigned),
            "PUBLIC KEY BLOCK" => Some(Self::PublicKey),
            "PRIVATE KEY BLOCK" | "SECRET KEY BLOCK" => Some(Self::PrivateKey),
            n if n.starts_with("MESSAGE, PART") || n.starts_with("MESSAGE PART") => {
                Some(Self::MultiPartMessage)
            }
            _ => None,
        }
    }

    /// Whether the block carries material the crypto engine can act on in place.
    pub fn is_actionable(self) -> bool {
        matches!(self, Self::Message | Self::ClearSigned)
    }
}

/// One classified region of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmorBlock<'a> {
    pub kind: ArmorKind,
    text: &'a [u8],
}

impl<'a> ArmorBlock<'a> {
    /// The raw bytes of the block, marker lines included.
    pub fn text(&self) -> &'a [u8] {
        self.text
    }

    /// Whether the block contains only whitespace.
    pub fn is_blank(&self) -> bool {
        self.text.iter().all(u8::is_ascii_whitespace)
    }
}

/// Split `input` into armor blocks.
///
/// Empty input yields no blocks; input without markers yields one
/// [`ArmorKind::PlainText`] block. A BEGIN marker with no matching END turns
/// the rest of the input into a single [`ArmorKind::Unclassified`] block;
/// text before that marker stays a separate plain block.
pub fn split(input: &[u8]) -> Vec<ArmorBlock<'_>> {
    let mut blocks = Vec::new();
    let mut plain_start = 0;
    let mut pos = 0;

    while pos < input.len() {
        let line_end = next_line_end(input, pos);
        let kind_and_name = marker_name(&input[pos..line_end], BEGIN_PREFIX)
            .and_then(|name| ArmorKind::from_name(&name).map(|kind| (kind, name)));

        let Some((kind, name)) = kind_and_name else {
            pos = line_end;
            continue;
        };

        let end_names = if kind == ArmorKind::ClearSigned {
            vec![name, "SIGNATURE".to_string()]
        } else {
            vec![name]
        };

        push_plain(&mut blocks, &input[plain_start..pos]);

        match find_end_marker(input, line_end, &end_names) {
            Some(block_end) => {
                blocks.push(ArmorBlock {
                    kind,
                    text: &input[pos..block_end],
                });
                plain_start = block_end;
                pos = block_end;
            }
            None => {
                blocks.push(ArmorBlock {
                    kind: ArmorKind::Unclassified,
                    text: &input[pos..],
                });
                return blocks;
            }
        }
    }

    push_plain(&mut blocks, &input[plain_start..]);
    blocks
}

/// Recover the signed text of a `PGP SIGNED MESSAGE` block without
/// verifying it.
///
/// Armor headers (`Hash: …`) and the signature are dropped and dash-escaped
/// lines (`- text`) are restored. The line break before the signature
/// belongs to the armor and is removed. Returns `None` when `block` does not
/// start with a clear-signed BEGIN marker.
pub fn clear_signed_text(block: &[u8]) -> Option<Vec<u8>> {
    let mut lines = block.split_inclusive(|&b| b == b'\n');
    let first = lines.next()?;
    if marker_name(first, BEGIN_PREFIX).as_deref() != Some("SIGNED MESSAGE") {
        return None;
    }

    let mut text = Vec::new();
    let mut in_headers = true;
    for line in lines {
        let bare = trim_line_end(line);
        if in_headers {
            in_headers = false;
            if bare.is_empty() {
                continue;
            }
            if is_armor_header(bare) {
                in_headers = true;
                continue;
            }
        }
        if marker_name(line, BEGIN_PREFIX).as_deref() == Some("SIGNATURE")
            || marker_name(line, END_PREFIX).as_deref() == Some("SIGNED MESSAGE")
        {
            break;
        }
        text.extend_from_slice(line.strip_prefix(b"- ").unwrap_or(line));
    }

    let kept = trim_line_end(&text).len();
    text.truncate(kept);
    Some(text)
}

/// `Name: value` with a token name, as in `Hash: SHA256`.
fn is_armor_header(line: &[u8]) -> bool {
    line.iter()
        .position(|&b| b == b':')
        .is_some_and(|colon| {
            colon > 0
                && line[..colon].iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
                && line.get(colon + 1).is_none_or(|&b| b == b' ')
        })
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn push_plain<'a>(blocks: &mut Vec<ArmorBlock<'a>>, text: &'a [u8]) {
    if !text.is_empty() {
        blocks.push(ArmorBlock {
            kind: ArmorKind::PlainText,
            text,
        });
    }
}

/// Offset just past the line starting at `pos` (newline included).
fn next_line_end(input: &[u8], pos: usize) -> usize {
    input[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(input.len(), |p| pos + p + 1)
}

/// Extract the armor name from a marker line: `-----BEGIN PGP NAME-----` → `NAME`.
///
/// Trailing dashes are optional.
fn marker_name(line: &[u8], prefix: &[u8]) -> Option<String> {
    let rest = line.strip_prefix(prefix)?;
    let rest = std::str::from_utf8(rest).ok()?;
    let name = rest.trim_end().trim_end_matches('-').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Find the first END marker for any of `names` starting at `from`; returns
/// the offset past its line.
fn find_end_marker(input: &[u8], from: usize, names: &[String]) -> Option<usize> {
    let mut pos = from;
    while pos < input.len() {
        let line_end = next_line_end(input, pos);
        if marker_name(&input[pos..line_end], END_PREFIX).is_some_and(|n| names.contains(&n)) {
            return Some(line_end);
        }
        pos = line_end;
    }
    None
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn texts<'a>(blocks: &[ArmorBlock<'a>]) -> Vec<&'a [u8]> {
        blocks.iter().map(|b| b.text()).collect()
    }

    fn kinds(blocks: &[ArmorBlock<'_>]) -> Vec<ArmorKind> {
        blocks.iter().map(|b| b.kind).collect()
    }

    #[test]
    fn test_empty_input() {
        assert!(split(b"").is_empty());
    }

    #[test]
    fn test_no_armor() {
        let blocks = split(b"testblabla");
        assert_eq!(kinds(&blocks), vec![ArmorKind::PlainText]);
        assert_eq!(texts(&blocks), vec![b"testblabla".as_slice()]);
    }

    #[test]
    fn test_embedded_message() {
        let input = b"before\n-----BEGIN PGP MESSAGE-----\ncrypted - you see :)\n-----END PGP MESSAGE-----\nafter";
        let blocks = split(input);
        assert_eq!(
            kinds(&blocks),
            vec![ArmorKind::PlainText, ArmorKind::Message, ArmorKind::PlainText]
        );
        assert_eq!(blocks[0].text(), b"before\n");
        assert_eq!(
            blocks[1].text(),
            b"-----BEGIN PGP MESSAGE-----\ncrypted - you see :)\n-----END PGP MESSAGE-----\n"
        );
        assert_eq!(blocks[2].text(), b"after");
    }

    #[test]
    fn test_clear_signed_runs_to_signature_end() {
        let input = b"before\n-----BEGIN PGP SIGNED MESSAGE-----\nsigned content\n-----BEGIN PGP SIGNATURE-----\nfancy signature\n-----END PGP SIGNATURE-----\nafter";
        let blocks = split(input);
        assert_eq!(
            kinds(&blocks),
            vec![ArmorKind::PlainText, ArmorKind::ClearSigned, ArmorKind::PlainText]
        );
        assert_eq!(
            blocks[1].text(),
            b"-----BEGIN PGP SIGNED MESSAGE-----\nsigned content\n-----BEGIN PGP SIGNATURE-----\nfancy signature\n-----END PGP SIGNATURE-----\n"
        );
    }

    #[test]
    fn test_multiple_blocks() {
        let input = b"before\n-----BEGIN PGP SIGNED MESSAGE-----\nsigned content\n-----BEGIN PGP SIGNATURE-----\nfancy signature\n-----END PGP SIGNATURE-----\nafter\n-----BEGIN PGP MESSAGE-----\ncrypted - you see :)\n-----END PGP MESSAGE-----\n";
        let blocks = split(input);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[2].text(), b"after\n");
        assert_eq!(blocks[3].kind, ArmorKind::Message);
    }

    #[test]
    fn test_every_armor_name_classifies() {
        let cases = [
            ("MESSAGE", ArmorKind::Message),
            ("MESSAGE PART", ArmorKind::MultiPartMessage),
            ("MESSAGE, PART 1/2", ArmorKind::MultiPartMessage),
            ("SIGNATURE", ArmorKind::Signature),
            ("SIGNED MESSAGE", ArmorKind::ClearSigned),
            ("PUBLIC KEY BLOCK", ArmorKind::PublicKey),
            ("PRIVATE KEY BLOCK", ArmorKind::PrivateKey),
        ];
        for (name, kind) in cases {
            let body = format!("-----BEGIN PGP {name}\ntext\n-----END PGP {name}\n");
            let input = format!("before\n{body}");
            let blocks = split(input.as_bytes());
            assert_eq!(blocks.len(), 2, "{name}");
            assert_eq!(blocks[1].kind, kind, "{name}");
            assert_eq!(blocks[1].text(), body.as_bytes(), "{name}");
        }
    }

    #[test]
    fn test_clear_signed_closes_at_first_end_marker() {
        let input = b"-----BEGIN PGP SIGNED MESSAGE-----\nbody\n-----END PGP SIGNED MESSAGE-----\ntail\n-----END PGP SIGNATURE-----\n";
        let blocks = split(input);
        assert_eq!(kinds(&blocks), vec![ArmorKind::ClearSigned, ArmorKind::PlainText]);
        assert_eq!(blocks[1].text(), b"tail\n-----END PGP SIGNATURE-----\n");
    }

    #[test]
    fn test_unterminated_block_keeps_leading_text_separate() {
        let blocks = split(b"before\n-----BEGIN PGP SIGNED MESSAGE-----\nno end\n");
        assert_eq!(
            kinds(&blocks),
            vec![ArmorKind::PlainText, ArmorKind::Unclassified]
        );
        assert_eq!(blocks[0].text(), b"before\n");
    }

    #[test]
    fn test_unterminated_block_is_unclassified() {
        let input = b"before\n-----BEGIN PGP MESSAGE-----\ntext\n";
        let blocks = split(input);
        assert_eq!(
            kinds(&blocks),
            vec![ArmorKind::PlainText, ArmorKind::Unclassified]
        );
        assert_eq!(blocks[1].text(), b"-----BEGIN PGP MESSAGE-----\ntext\n");
    }

    #[test]
    fn test_unknown_armor_name_stays_plain() {
        let input = b"-----BEGIN PGP FOO-----\nx\n-----END PGP FOO-----\n";
        assert_eq!(kinds(&split(input)), vec![ArmorKind::PlainText]);
    }

    #[test]
    fn test_marker_is_case_sensitive() {
        let input = b"-----begin pgp message-----\nx\n-----end pgp message-----\n";
        assert_eq!(kinds(&split(input)), vec![ArmorKind::PlainText]);
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let inputs: [&[u8]; 5] = [
            b"",
            b"\n\n\n",
            b"a\r\n-----BEGIN PGP MESSAGE-----\r\nx\r\n-----END PGP MESSAGE-----\r\nb",
            b"-----BEGIN PGP PUBLIC KEY BLOCK-----\nk\n-----END PGP PUBLIC KEY BLOCK-----",
            b"x\n-----BEGIN PGP MESSAGE-----\nnever ends\n",
        ];
        for input in inputs {
            let joined: Vec<u8> = split(input)
                .iter()
                .flat_map(|b| b.text().iter().copied())
                .collect();
            assert_eq!(joined, input);
        }
    }

    #[test]
    fn test_clear_signed_text() {
        let block = b"-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\nhello world\n- -- not a marker\n\n-----BEGIN PGP SIGNATURE-----\niQEz\n-----END PGP SIGNATURE-----\n";
        assert_eq!(
            clear_signed_text(block).unwrap(),
            b"hello world\n-- not a marker\n".to_vec()
        );
    }

    #[test]
    fn test_clear_signed_text_without_headers_or_signature() {
        let block = b"-----BEGIN PGP SIGNED MESSAGE-----\r\n\r\nline one\r\n-----END PGP SIGNED MESSAGE-----\r\n";
        assert_eq!(clear_signed_text(block).unwrap(), b"line one".to_vec());
        assert!(clear_signed_text(b"-----BEGIN PGP MESSAGE-----\nx\n").is_none());
    }

    proptest! {
        #[test]
        fn split_concatenates_back_to_input(
            lines in proptest::collection::vec(
                prop_oneof![
                    Just(b"-----BEGIN PGP MESSAGE-----".to_vec()),
                    Just(b"-----END PGP MESSAGE-----".to_vec()),
                    Just(b"-----BEGIN PGP SIGNED MESSAGE-----".to_vec()),
                    Just(b"-----BEGIN PGP SIGNATURE-----".to_vec()),
                    Just(b"-----END PGP SIGNATURE-----".to_vec()),
                    Just(b"-----END PGP SIGNED MESSAGE-----".to_vec()),
                    proptest::collection::vec(any::<u8>(), 0..40),
                ],
                0..24,
            ),
            crlf in any::<bool>(),
        ) {
            let sep: &[u8] = if crlf { b"\r\n" } else { b"\n" };
            let input = lines.join(sep);
            let joined: Vec<u8> = split(&input)
                .iter()
                .flat_map(|b| b.text().iter().copied())
                .collect();
            prop_assert_eq!(joined, input);
        }
    }
}

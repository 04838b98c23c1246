//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), structured
//! parameters (RFC 2045/2231) and date parsing.

use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

/// Base64 engine tolerant of missing or superfluous padding, as found in
/// real-world encoded words.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A structured header value such as `Content-Type` or `Content-Disposition`.
///
/// `value` is lower-cased (`"multipart/signed"`, `"attachment"`); parameter
/// names are lower-cased, parameter values keep their case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredValue {
    pub value: String,
    pub params: BTreeMap<String, String>,
}

impl StructuredValue {
    /// Look up a parameter (case-insensitive name).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Header bytes as text: UTF-8 when valid (BOM stripped), Windows-1252 otherwise.
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Join folded lines and split the block into `(lowercase_name, value)`
/// pairs, keeping header order. Lines without a colon are ignored.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        let folded = line.starts_with([' ', '\t']);
        match (folded, fields.last_mut()) {
            (true, Some((_, value))) => {
                value.push(' ');
                value.push_str(line.trim());
            }
            (true, None) => {}
            (false, _) => {
                if let Some((name, value)) = line.split_once(':') {
                    fields.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
                }
            }
        }
    }
    fields
}

/// Get the first value for a header name (case-insensitive).
pub fn get_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    let name = name.to_ascii_lowercase();
    headers
        .iter()
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.as_str())
}

/// Parse a structured header value: `type/subtype; name=value; name*0="…"`.
///
/// Quoted strings may contain `;`. RFC 2231 continuations (`name*0`, `name*1`)
/// are concatenated in order and extended values (`name*=utf-8''a%20b`) are
/// percent-decoded. Encoded words in parameter values (a common violation)
/// are decoded as well.
pub fn parse_structured(raw: &str) -> StructuredValue {
    let mut segments = split_unquoted(raw, ';').into_iter();
    let value = segments
        .next()
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let mut continuations: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
    let mut params = BTreeMap::new();

    for segment in segments {
        let Some((name, val)) = segment.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let val = unquote(val.trim());
        if name.is_empty() {
            continue;
        }

        let (base, extended) = match name.strip_suffix('*') {
            Some(base) => (base.to_string(), true),
            None => (name.clone(), false),
        };

        if let Some((base_name, index)) = base.rsplit_once('*') {
            if let Ok(index) = index.parse::<usize>() {
                let val = if extended { decode_extended_value(&val) } else { val };
                continuations
                    .entry(base_name.to_string())
                    .or_default()
                    .push((index, val));
                continue;
            }
        }

        let val = if extended {
            decode_extended_value(&val)
        } else {
            decode_encoded_words(&val)
        };
        params.insert(base, val);
    }

    for (name, mut parts) in continuations {
        parts.sort_by_key(|(index, _)| *index);
        let joined: String = parts.into_iter().map(|(_, v)| v).collect();
        params.entry(name).or_insert(joined);
    }

    StructuredValue { value, params }
}

/// Split on `sep` outside of double-quoted strings.
fn split_unquoted(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c == sep && !in_quotes => out.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    out.push(current);
    out
}

/// Remove surrounding quotes and resolve backslash escapes.
fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return s.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
fn decode_extended_value(s: &str) -> String {
    let mut pieces = s.splitn(3, '\'');
    let (charset, encoded) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_lang), Some(rest)) => (charset, rest),
        _ => ("us-ascii", s),
    };

    let bytes = encoded.as_bytes();
    let mut raw = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
            if let Ok(b) = u8::from_str_radix(hex, 16) {
                raw.push(b);
                i += 3;
                continue;
            }
        }
        raw.push(bytes[i]);
        i += 1;
    }

    let charset = if charset.is_empty() { "us-ascii" } else { charset };
    decode_charset(charset, &raw)
}

/// Resolve RFC 2047 encoded words (`=?charset?B|Q?text?=`) in a header value.
///
/// Linear whitespace between two adjacent encoded words is dropped.
/// Malformed words are kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut after_word = false;

    while let Some(pos) = rest.find("=?") {
        let (plain, candidate) = rest.split_at(pos);
        match EncodedWord::parse(candidate) {
            Some((word, len)) => {
                if !(after_word && plain.trim().is_empty()) {
                    out.push_str(plain);
                }
                out.push_str(&word.decode());
                rest = &candidate[len..];
                after_word = true;
            }
            None => {
                out.push_str(plain);
                out.push_str("=?");
                rest = &candidate[2..];
                after_word = false;
            }
        }
    }
    out.push_str(rest);
    out
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: char,
    text: &'a str,
}

impl<'a> EncodedWord<'a> {
    /// Parse a word at the start of `s` (which begins with `=?`); returns the
    /// word and its length in bytes.
    fn parse(s: &'a str) -> Option<(Self, usize)> {
        let body = s.strip_prefix("=?")?;
        let (charset, body) = body.split_once('?')?;
        let (encoding, body) = body.split_once('?')?;
        let end = body.find("?=")?;
        let mut enc = encoding.chars();
        let encoding = enc.next()?.to_ascii_uppercase();
        if enc.next().is_some() || !matches!(encoding, 'B' | 'Q') || charset.is_empty() {
            return None;
        }
        let len = 2 + charset.len() + 1 + 1 + 1 + end + 2;
        // RFC 2231 language suffix: `utf-8*en`
        let charset = charset.split('*').next().unwrap_or(charset);
        Some((
            Self {
                charset,
                encoding,
                text: &body[..end],
            },
            len,
        ))
    }

    fn decode(&self) -> String {
        let bytes = if self.encoding == 'B' {
            let compact: Vec<u8> = self
                .text
                .bytes()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            match LENIENT_BASE64.decode(compact) {
                Ok(bytes) => bytes,
                Err(_) => return format!("=?{}?B?{}?=", self.charset, self.text),
            }
        } else {
            decode_q_encoding(self.text)
        };
        decode_charset(self.charset, &bytes)
    }
}

/// Q encoding: `_` is a space, `=XX` a hex byte. Invalid escapes pass through.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while let Some(&b) = bytes.get(i) {
        let escaped = match bytes.get(i + 1..i + 3) {
            Some(&[hi, lo]) if b == b'=' => hex_value(hi).zip(hex_value(lo)).map(|(h, l)| h << 4 | l),
            _ => None,
        };
        match (b, escaped) {
            (_, Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (b'_', None) => {
                out.push(b' ');
                i += 1;
            }
            (other, None) => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Decode bytes using a named charset.
///
/// Unknown charsets fall back to lossy UTF-8.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let charset_lower = charset.trim().to_lowercase();
    match charset_lower.as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" | "" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset_lower.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(
                    charset = charset,
                    "Unknown charset, falling back to UTF-8 lossy"
                );
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}

/// Strip the surrounding `<…>` of a Content-ID or Message-ID.
pub fn strip_angle_brackets(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

const DATE_FORMATS: &[&str] = &[
    "%d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a `Date:` header. RFC 2822 and RFC 3339 first, then a handful of
/// common deviations (missing weekday, named zones, no zone at all).
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    let strict = DateTime::parse_from_rfc2822(trimmed)
        .or_else(|_| DateTime::parse_from_rfc3339(trimmed));
    if let Ok(dt) = strict {
        return Some(dt.with_timezone(&Utc));
    }

    let relaxed = numeric_zone(without_weekday(trimmed));
    let zoned = DATE_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&relaxed, fmt).ok())
        .map(|dt| dt.with_timezone(&Utc));
    let parsed = zoned.or_else(|| {
        NAIVE_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(&relaxed, fmt).ok())
            .map(|ndt| Utc.from_utc_datetime(&ndt))
    });

    if parsed.is_none() {
        warn!(date = trimmed, "Unparseable date header");
    }
    parsed
}

/// Drop a leading `Thu,` / `Thu ` weekday.
fn without_weekday(s: &str) -> &str {
    const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
    match s.get(..3) {
        Some(prefix) if WEEKDAYS.contains(&prefix.to_ascii_lowercase().as_str()) => {
            s[3..].trim_start_matches(',').trim_start()
        }
        _ => s,
    }
}

/// Rewrite a trailing zone abbreviation (`EST`, `CET`, ...) as a numeric offset.
fn numeric_zone(s: &str) -> String {
    let Some((head, zone)) = s.rsplit_once(' ') else {
        return s.to_owned();
    };
    let offset = match zone.to_ascii_uppercase().as_str() {
        "UT" | "UTC" | "GMT" | "Z" => "+0000",
        "EST" | "CDT" => "-0500",
        "EDT" => "-0400",
        "CST" | "MDT" => "-0600",
        "MST" | "PDT" => "-0700",
        "PST" => "-0800",
        "CET" => "+0100",
        "CEST" => "+0200",
        _ => return s.to_owned(),
    };
    format!("{head} {offset}")
}

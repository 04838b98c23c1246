//! Mailbox parsing for `From`/`To` headers and key user ids.

use serde::Serialize;

use crate::parser::header::decode_encoded_words;

/// One mailbox: `Name <local@domain>`.
///
/// Key user ids use the same syntax with an optional comment
/// (`Name (work) <local@domain>`); comments are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailAddress {
    /// Human-readable name (may be empty).
    pub display_name: String,
    /// The bare address (`local@domain`), or the raw text when there is none.
    pub address: String,
}

impl EmailAddress {
    /// Parse one mailbox. Text that is not a mailbox ends up in `address`.
    pub fn parse(raw: &str) -> Self {
        let mailbox = scan(raw);
        if let Some(addr) = mailbox.angle {
            return Self {
                display_name: mailbox.phrase,
                address: addr,
            };
        }
        Self {
            display_name: String::new(),
            address: mailbox.phrase,
        }
    }

    /// Parse a header value, decoding RFC 2047 encoded words first.
    pub fn from_header(raw: &str) -> Self {
        Self::parse(&decode_encoded_words(raw))
    }

    /// Split an address list on commas outside quotes, comments and angle
    /// brackets. Empty entries are skipped.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let decoded = decode_encoded_words(raw);
        split_top_level(&decoded)
            .into_iter()
            .map(Self::parse)
            .filter(|a| !a.address.is_empty())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_empty() && self.display_name.is_empty()
    }

    /// `Name <address>`, or the address alone.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

struct Mailbox {
    phrase: String,
    angle: Option<String>,
}

/// Walk the input once, collecting the display phrase (quotes removed,
/// comments dropped) and the last `<…>` group.
fn scan(raw: &str) -> Mailbox {
    let mut phrase = String::new();
    let mut angle: Option<String> = None;
    let mut chars = raw.trim().chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    phrase.push(escaped);
                }
            }
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => skip_comment(&mut chars),
            '<' if !in_quotes => {
                let inner: String = chars.by_ref().take_while(|&c| c != '>').collect();
                angle = Some(inner.trim().to_string());
            }
            _ => phrase.push(c),
        }
    }

    Mailbox {
        phrase: collapse_whitespace(&phrase),
        angle,
    }
}

/// Consume a (possibly nested) comment; the opening parenthesis is already read.
fn skip_comment(chars: &mut std::str::Chars<'_>) {
    let mut depth = 1;
    for c in chars.by_ref() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn split_top_level(raw: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut comment_depth = 0usize;

    for (i, c) in raw.char_indices() {
        match c {
            '"' if comment_depth == 0 => in_quotes = !in_quotes,
            '(' if !in_quotes => comment_depth += 1,
            ')' if !in_quotes => comment_depth = comment_depth.saturating_sub(1),
            '<' if !in_quotes && comment_depth == 0 => in_angle = true,
            '>' if !in_quotes && comment_depth == 0 => in_angle = false,
            ',' if !in_quotes && !in_angle && comment_depth == 0 => {
                parts.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&raw[start..]);
    parts
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

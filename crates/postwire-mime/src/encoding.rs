//! Body and header encodings.
//!
//! Quoted-Printable output never starts a line with `.`, so a composed body
//! can go straight into SMTP `DATA` without dot-stuffing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Maximum encoded line length, soft break `=` included.
const MAX_LINE_LENGTH: usize = 76;

/// Longest raw chunk per RFC 2047 encoded word; 45 bytes are 60 base64 chars.
const MAX_WORD_BYTES: usize = 45;

/// Encodes text using Quoted-Printable (RFC 2045).
///
/// Line breaks (`\n` or `\r\n`) become CRLF. Trailing whitespace and a `.` at
/// the start of any output line are escaped.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        encode_qp_line(line.as_bytes(), &mut result);
    }

    result
}

fn encode_qp_line(bytes: &[u8], out: &mut String) {
    let mut line_length = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        let last = i + 1 == bytes.len();
        let literal = match byte {
            b'.' => line_length > 0,
            b' ' | b'\t' => !last,
            b'!'..=b'<' | b'>'..=b'~' => true,
            _ => false,
        };
        let width = if literal { 1 } else { 3 };

        if line_length + width > MAX_LINE_LENGTH - 1 {
            out.push_str("=\r\n");
            line_length = 0;
        }

        // A break may have moved a dot to the start of the line
        if literal && !(byte == b'.' && line_length == 0) {
            out.push(char::from(byte));
            line_length += 1;
        } else {
            let _ = write!(out, "={byte:02X}");
            line_length += 3;
        }
    }
}

/// Returns true if a header value must be RFC 2047 encoded.
#[must_use]
pub fn needs_encoding(text: &str) -> bool {
    text.contains("=?") || text.chars().any(|c| !c.is_ascii() || c.is_ascii_control())
}

/// Encodes a header value using RFC 2047 `B` encoding when needed.
///
/// Long values are split into several encoded words joined by folding
/// whitespace; words never split a UTF-8 sequence.
///
/// Format: `=?charset?B?encoded-text?=`
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > MAX_WORD_BYTES {
            words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join("\r\n ")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base64_encode() {
        assert_eq!(encode_base64(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_quoted_printable_ascii_unchanged() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_quoted_printable_utf8() {
        assert_eq!(encode_quoted_printable("Héllo"), "H=C3=A9llo");
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
    }

    #[test]
    fn test_quoted_printable_line_breaks() {
        assert_eq!(encode_quoted_printable("one\ntwo\r\nthree"), "one\r\ntwo\r\nthree");
    }

    #[test]
    fn test_quoted_printable_trailing_whitespace() {
        assert_eq!(encode_quoted_printable("end \nnext\t"), "end=20\r\nnext=09");
    }

    #[test]
    fn test_quoted_printable_leading_dot() {
        assert_eq!(encode_quoted_printable(".\n..x\na.b"), "=2E\r\n=2E.x\r\na.b");
    }

    #[test]
    fn test_quoted_printable_soft_break() {
        let encoded = encode_quoted_printable(&"a".repeat(100));
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert!(lines[0].ends_with('='));
        assert_eq!(lines[1], "a".repeat(25));
    }

    #[test]
    fn test_dot_after_soft_break_is_escaped() {
        let text = format!("{}.tail", "a".repeat(75));
        let encoded = encode_quoted_printable(&text);
        assert_eq!(encoded, format!("{}=\r\n=2Etail", "a".repeat(75)));
    }

    #[test]
    fn test_rfc2047_plain_ascii() {
        assert_eq!(encode_rfc2047("Hello", "utf-8"), "Hello");
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Héllo", "utf-8"), "=?utf-8?B?SMOpbGxv?=");
    }

    #[test]
    fn test_rfc2047_long_value_is_split() {
        let text = "ü".repeat(40);
        let encoded = encode_rfc2047(&text, "utf-8");
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert_eq!(words.len(), 2);
        for word in words {
            assert!(word.starts_with("=?utf-8?B?") && word.ends_with("?="));
            assert!(word.len() <= 75);
        }
    }

    proptest! {
        #[test]
        fn qp_lines_are_short_and_never_start_with_dot(text in "[ -~\n.äöü]{0,300}") {
            let encoded = encode_quoted_printable(&text);
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
                prop_assert!(!line.starts_with('.'));
                prop_assert!(line.is_ascii());
            }
        }
    }
}

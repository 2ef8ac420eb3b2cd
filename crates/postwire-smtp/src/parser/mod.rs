//! SMTP reply framing.
//!
//! Replies arrive as arbitrary byte chunks. A reply is complete once a chunk
//! ends with a line feed and the last line is a terminal line (`250 ...` or a
//! bare `250`), not a continuation line (`250-...`):
//!
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Maximum size of a buffered reply to prevent memory exhaustion.
const MAX_REPLY_LENGTH: usize = 1024 * 1024; // 1 MB

/// Turns received byte chunks into complete replies.
#[derive(Debug, Default)]
pub struct ReplyFramer {
    buffer: Vec<u8>,
}

impl ReplyFramer {
    /// Creates an empty framer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feeds one received chunk.
    ///
    /// Returns `Ok(None)` while the reply is still incomplete.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the buffered reply grows past 1 MiB or a
    /// completed reply does not start with a three digit code.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Reply>> {
        if chunk.is_empty() {
            return Ok(None);
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MAX_REPLY_LENGTH {
            self.buffer.clear();
            return Err(Error::Protocol(format!(
                "reply too large (max {MAX_REPLY_LENGTH} bytes)"
            )));
        }

        if self.buffer.last() != Some(&b'\n') {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&self.buffer)
            .trim_end_matches(['\r', '\n'])
            .to_string();

        if text.is_empty() {
            // Stray blank line
            self.buffer.clear();
            return Ok(None);
        }

        if is_continuation(&text) {
            self.buffer.clear();
            self.buffer.extend_from_slice(text.as_bytes());
            self.buffer.extend_from_slice(b"\r\n");
            return Ok(None);
        }

        self.buffer.clear();
        let code = ReplyCode::parse(text.as_bytes())
            .ok_or_else(|| Error::Protocol(format!("Invalid reply code: {text}")))?;

        Ok(Some(Reply::new(code, text)))
    }

    /// Discards any partially received reply.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Returns true if part of a reply is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Checks whether the last line of `text` is a continuation line.
#[must_use]
pub fn is_continuation(text: &str) -> bool {
    let last = text.rsplit('\n').next().unwrap_or(text).as_bytes();
    matches!(
        last,
        [a, b, c, b'-', ..] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit()
    )
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

    fn feed(framer: &mut ReplyFramer, chunks: &[&[u8]]) -> Vec<Reply> {
        chunks
            .iter()
            .filter_map(|chunk| framer.push(chunk).unwrap())
            .collect()
    }

    #[test]
    fn test_single_line_reply() {
        let mut framer = ReplyFramer::new();
        let reply = framer.push(b"250 OK\r\n").unwrap().unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.text, "250 OK");
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_multi_line_reply_in_one_chunk() {
        let mut framer = ReplyFramer::new();
        let reply = framer
            .push(b"250-First line\r\n250-Second line\r\n250 Last line\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(reply.message(), "First line\nSecond line\nLast line");
    }

    #[test]
    fn test_split_multi_line_reply() {
        let mut framer = ReplyFramer::new();
        let replies = feed(
            &mut framer,
            &[b"250-Hel", b"lo\r\n250 A", b"UTH LOGIN PLAIN\r\n"],
        );
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code.as_u16(), 250);
        assert_eq!(replies[0].text, "250-Hello\r\n250 AUTH LOGIN PLAIN");
    }

    #[test]
    fn test_continuation_line_by_line() {
        let mut framer = ReplyFramer::new();
        assert!(framer.push(b"250-mx.example.com\r\n").unwrap().is_none());
        assert!(framer.push(b"250-STARTTLS\r\n").unwrap().is_none());
        let reply = framer.push(b"250 SIZE 1000\r\n").unwrap().unwrap();
        assert_eq!(reply.lines().count(), 3);
    }

    #[test]
    fn test_empty_continuation_text() {
        let mut framer = ReplyFramer::new();
        assert!(framer.push(b"250-\r\n").unwrap().is_none());
        let reply = framer.push(b"250 done\r\n").unwrap().unwrap();
        assert_eq!(reply.text, "250-\r\n250 done");
    }

    #[test]
    fn test_bare_code_is_terminal() {
        let mut framer = ReplyFramer::new();
        let reply = framer.push(b"354\r\n").unwrap().unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
    }

    #[test]
    fn test_split_between_cr_and_lf() {
        let mut framer = ReplyFramer::new();
        assert!(framer.push(b"220 ready\r").unwrap().is_none());
        let reply = framer.push(b"\n").unwrap().unwrap();
        assert_eq!(reply.text, "220 ready");
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut framer = ReplyFramer::new();
        assert!(framer.push(b"\r\n").unwrap().is_none());
        assert!(!framer.has_partial());
        assert!(framer.push(b"221 bye\r\n").unwrap().is_some());
    }

    #[test]
    fn test_invalid_code() {
        let mut framer = ReplyFramer::new();
        assert!(matches!(
            framer.push(b"ABC OK\r\n"),
            Err(Error::Protocol(_))
        ));
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_reply_too_large() {
        let mut framer = ReplyFramer::new();
        let junk = vec![b'x'; MAX_REPLY_LENGTH + 1];
        assert!(framer.push(&junk).is_err());
    }

    #[test]
    fn test_reset_discards_partial() {
        let mut framer = ReplyFramer::new();
        assert!(framer.push(b"220 plain").unwrap().is_none());
        framer.reset();
        let reply = framer.push(b"250 tls\r\n").unwrap().unwrap();
        assert_eq!(reply.text, "250 tls");
    }

    #[test]
    fn test_is_continuation() {
        assert!(is_continuation("250-Continuing"));
        assert!(is_continuation("250 first\r\n250-second"));
        assert!(!is_continuation("250-first\r\n250 last"));
        assert!(!is_continuation("250"));
        assert!(!is_continuation("25-"));
    }

    fn reply_lines() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[ -~]{0,20}", 1..5)
    }

    proptest! {
        #[test]
        fn chunk_boundaries_do_not_matter(
            lines in reply_lines(),
            code in 200u16..600,
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        ) {
            let last = lines.len() - 1;
            let mut wire = Vec::new();
            for (i, line) in lines.iter().enumerate() {
                let sep = if i == last { ' ' } else { '-' };
                wire.extend_from_slice(format!("{code}{sep}{line}\r\n").as_bytes());
            }

            let mut whole = ReplyFramer::new();
            let expected = whole.push(&wire).unwrap().unwrap();

            let mut positions: Vec<usize> = cuts.iter().map(|i| i.index(wire.len())).collect();
            positions.push(0);
            positions.push(wire.len());
            positions.sort_unstable();
            positions.dedup();

            let mut split = ReplyFramer::new();
            let mut got = Vec::new();
            for pair in positions.windows(2) {
                if let Some(reply) = split.push(&wire[pair[0]..pair[1]]).unwrap() {
                    got.push(reply);
                }
            }

            prop_assert_eq!(got.len(), 1);
            prop_assert_eq!(&got[0], &expected);
            prop_assert_eq!(expected.code.as_u16(), code);
        }
    }
}

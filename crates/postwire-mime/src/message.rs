//! Single-part message composition.

use crate::address::Mailbox;
use crate::content_type::BodyType;
use crate::encoding::{encode_quoted_printable, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Local};
use std::fmt;

/// Longest line allowed in a 7bit body.
const MAX_7BIT_LINE: usize = 998;

/// Transfer encoding of the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Short ASCII lines, sent as is.
    SevenBit,
    /// Quoted-Printable.
    QuotedPrintable,
}

impl TransferEncoding {
    /// Picks the encoding for a body.
    ///
    /// Bodies with non-ASCII text, overlong lines or a line starting with `.`
    /// are Quoted-Printable encoded.
    #[must_use]
    pub fn for_body(body: &str) -> Self {
        let plain = body.is_ascii()
            && body.lines().all(|line| {
                line.len() <= MAX_7BIT_LINE
                    && !line.starts_with('.')
                    && !line.trim_end_matches('\r').contains('\r')
            });
        if plain {
            Self::SevenBit
        } else {
            Self::QuotedPrintable
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
        }
    }
}

/// Composed message: headers plus encoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message headers.
    pub headers: Headers,
    /// Encoded body with CRLF line breaks.
    pub body: String,
}

impl Message {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Returns the wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n{}", self.headers, self.body)
    }
}

/// Builds a single-part `text/plain` or `text/html` message.
///
/// Only `From`, `To` and `Cc` become address headers; blind copies belong in
/// the SMTP envelope alone.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    subject: Option<String>,
    body: String,
    body_type: BodyType,
    date: Option<DateTime<FixedOffset>>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, from: Mailbox) -> Self {
        self.from = Some(from);
        self
    }

    /// Adds a `To` recipient.
    #[must_use]
    pub fn to(mut self, to: Mailbox) -> Self {
        self.to.push(to);
        self
    }

    /// Adds a `Cc` recipient.
    #[must_use]
    pub fn cc(mut self, cc: Mailbox) -> Self {
        self.cc.push(cc);
        self
    }

    /// Sets the subject; non-ASCII text is RFC 2047 encoded as UTF-8.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the body text.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the body subtype.
    #[must_use]
    pub const fn body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    /// Sets the `Date` header; defaults to the local time at build.
    #[must_use]
    pub const fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] without a sender, or
    /// [`Error::InvalidHeader`] if the subject contains control characters
    /// that survive encoding.
    pub fn build(self) -> Result<Message> {
        let from = self.from.ok_or_else(|| Error::MissingHeader("From".into()))?;
        let date = self.date.unwrap_or_else(|| Local::now().fixed_offset());

        let mut headers = Headers::new();
        headers.add("From", from.to_string())?;
        if !self.to.is_empty() {
            headers.add("To", join(&self.to))?;
        }
        if !self.cc.is_empty() {
            headers.add("Cc", join(&self.cc))?;
        }
        if let Some(subject) = &self.subject {
            headers.add("Subject", encode_rfc2047(subject, "utf-8"))?;
        }
        headers.add("Date", date.to_rfc2822())?;
        headers.add("MIME-Version", "1.0")?;
        headers.add("Content-Type", self.body_type.content_type().to_string())?;

        let encoding = TransferEncoding::for_body(&self.body);
        headers.add("Content-Transfer-Encoding", encoding.to_string())?;

        let body = match encoding {
            TransferEncoding::SevenBit => normalize_line_breaks(&self.body),
            TransferEncoding::QuotedPrintable => encode_quoted_printable(&self.body),
        };

        Ok(Message { headers, body })
    }
}

fn join(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn normalize_line_breaks(text: &str) -> String {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect::<Vec<_>>()
        .join("\r\n")
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

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc2822("Tue, 1 Jul 2025 10:00:00 +0200").unwrap()
    }

    fn mb(s: &str) -> Mailbox {
        Mailbox::parse(s).unwrap()
    }

    #[test]
    fn test_plain_message() {
        let message = Message::builder()
            .from(mb("Sender <a@example.com>"))
            .to(mb("b@example.com"))
            .to(mb("c@example.com"))
            .cc(mb("d@example.com"))
            .subject("Hello")
            .body("line one\nline two")
            .date(date())
            .build()
            .unwrap();

        assert_eq!(
            message.to_string(),
            concat!(
                "From: Sender <a@example.com>\r\n",
                "To: b@example.com, c@example.com\r\n",
                "Cc: d@example.com\r\n",
                "Subject: Hello\r\n",
                "Date: Tue, 1 Jul 2025 10:00:00 +0200\r\n",
                "MIME-Version: 1.0\r\n",
                "Content-Type: text/plain; charset=utf-8\r\n",
                "Content-Transfer-Encoding: 7bit\r\n",
                "\r\n",
                "line one\r\nline two",
            )
        );
    }

    #[test]
    fn test_html_utf8_message() {
        let message = Message::builder()
            .from(mb("a@example.com"))
            .to(mb("b@example.com"))
            .subject("Grüße")
            .body("<p>Grüße</p>")
            .body_type(BodyType::Html)
            .date(date())
            .build()
            .unwrap();

        assert_eq!(message.headers.get("Subject"), Some("=?utf-8?B?R3LDvMOfZQ==?="));
        assert_eq!(
            message.headers.get("Content-Type"),
            Some("text/html; charset=utf-8")
        );
        assert_eq!(
            message.headers.get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
        assert_eq!(message.body, "<p>Gr=C3=BC=C3=9Fe</p>");
    }

    #[test]
    fn test_leading_dot_forces_quoted_printable() {
        let message = Message::builder()
            .from(mb("a@example.com"))
            .body("hi\n.\nbye")
            .date(date())
            .build()
            .unwrap();
        assert_eq!(message.body, "hi\r\n=2E\r\nbye");
        assert!(message.headers.get("To").is_none());
    }

    #[test]
    fn test_missing_from() {
        let err = Message::builder().to(mb("b@example.com")).build().unwrap_err();
        assert!(matches!(err, Error::MissingHeader(ref h) if h == "From"));
    }

    #[test]
    fn test_default_date_is_set() {
        let message = Message::builder().from(mb("a@example.com")).build().unwrap();
        let date = message.headers.get("Date").unwrap();
        assert!(DateTime::parse_from_rfc2822(date).is_ok());
    }

    #[test]
    fn test_transfer_encoding_choice() {
        assert_eq!(TransferEncoding::for_body("plain\r\ntext"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::for_body("ümlaut"), TransferEncoding::QuotedPrintable);
        assert_eq!(
            TransferEncoding::for_body(&"x".repeat(1000)),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::for_body("bare\rcr"), TransferEncoding::QuotedPrintable);
    }
}

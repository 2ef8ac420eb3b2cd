//! Collaborators that turn a [`SendData`] into an envelope and a payload.

use postwire_mime::{BodyType, Mailbox, Message};

use super::SendData;
use crate::error::{Error, Result};
use crate::types::Address;

/// Reduces address strings to bare envelope addresses.
pub trait AddressParser: Send + Sync {
    /// Parses exactly one address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed input.
    fn parse(&self, input: &str) -> Result<Address>;

    /// Parses a comma separated list; empty entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for the first malformed entry.
    fn parse_list(&self, input: &str) -> Result<Vec<Address>> {
        input
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| self.parse(entry))
            .collect()
    }
}

/// Produces the finished message bytes streamed after DATA.
pub trait MessageComposer: Send + Sync {
    /// Composes headers and body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the data cannot be rendered.
    fn compose(&self, data: &SendData, body_type: BodyType) -> Result<Vec<u8>>;
}

/// [`AddressParser`] backed by `postwire-mime` mailbox parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeAddressParser;

impl AddressParser for MimeAddressParser {
    fn parse(&self, input: &str) -> Result<Address> {
        Address::new(Mailbox::parse(input)?.address)
    }

    fn parse_list(&self, input: &str) -> Result<Vec<Address>> {
        Mailbox::parse_list(input)?
            .into_iter()
            .map(|mailbox| Address::new(mailbox.address))
            .collect()
    }
}

/// [`MessageComposer`] producing a single-part UTF-8 text message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimeComposer;

impl MessageComposer for MimeComposer {
    fn compose(&self, data: &SendData, body_type: BodyType) -> Result<Vec<u8>> {
        let from = data
            .from
            .as_deref()
            .ok_or_else(|| Error::Validation("missing sender".into()))?;

        let mut builder = Message::builder()
            .from(Mailbox::parse(from)?)
            .body(data.body.as_str())
            .body_type(body_type);
        if let Some(subject) = &data.subject {
            builder = builder.subject(subject.as_str());
        }
        for entry in &data.to {
            for mailbox in Mailbox::parse_list(entry)? {
                builder = builder.to(mailbox);
            }
        }
        for entry in &data.cc {
            for mailbox in Mailbox::parse_list(entry)? {
                builder = builder.cc(mailbox);
            }
        }

        Ok(builder.build()?.to_bytes())
    }
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

    /// Accepts anything containing `@`, as is.
    struct Lenient;

    impl AddressParser for Lenient {
        fn parse(&self, input: &str) -> Result<Address> {
            Address::new(input)
        }
    }

    #[test]
    fn test_mime_parser_strips_display_name() {
        let addr = MimeAddressParser.parse("Name <a@b.com>").unwrap();
        assert_eq!(addr.as_str(), "a@b.com");
    }

    #[test]
    fn test_mime_parser_list() {
        let list = MimeAddressParser
            .parse_list(r#""Doe, J" <j@x.com>, k@x.com"#)
            .unwrap();
        let addrs: Vec<&str> = list.iter().map(Address::as_str).collect();
        assert_eq!(addrs, vec!["j@x.com", "k@x.com"]);
    }

    #[test]
    fn test_mime_parser_rejects_garbage() {
        assert!(matches!(
            MimeAddressParser.parse("not an address"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_default_parse_list_splits_on_commas() {
        let list = Lenient.parse_list("a@x.com, ,b@x.com").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].as_str(), "b@x.com");
    }

    #[test]
    fn test_composer_skips_bcc() {
        let data = SendData::new()
            .from("Name <a@b.com>")
            .to("c@d.com, e@f.com")
            .cc("g@h.com")
            .bcc("secret@x.com")
            .subject("S")
            .body("B");
        let bytes = MimeComposer.compose(&data, BodyType::Html).unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with(
            "From: Name <a@b.com>\r\nTo: c@d.com, e@f.com\r\nCc: g@h.com\r\nSubject: S\r\n"
        ));
        assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(!text.contains("secret@x.com"));
        assert!(text.ends_with("\r\n\r\nB"));
    }

    #[test]
    fn test_composer_requires_sender() {
        let data = SendData::new().to("c@d.com").subject("S");
        assert!(matches!(
            MimeComposer.compose(&data, BodyType::Plain),
            Err(Error::Validation(_))
        ));
    }
}

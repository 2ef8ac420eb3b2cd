//! Mailbox parsing (`Name <local@domain>` or a bare address).

use crate::encoding::{encode_rfc2047, needs_encoding};
use crate::error::{Error, Result};
use std::fmt;

/// Characters that force a display name into a quoted string.
const SPECIALS: &str = "()<>[]:;@\\,.\"";

/// Email address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name.
    pub name: Option<String>,
    /// Address (`local@domain`).
    pub address: String,
}

impl Mailbox {
    /// Creates a mailbox from a bare address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is malformed.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self {
            name: None,
            address,
        })
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parses `addr@host`, `<addr@host>`, `Name <addr@host>` or
    /// `"Quoted, Name" <addr@host>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the input is not a single mailbox.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || Error::InvalidAddress(input.to_string());

        let Some(open) = find_unquoted(input, '<') else {
            return Self::new(input).map_err(|_| invalid());
        };

        let close = input[open..].find('>').map(|i| open + i).ok_or_else(invalid)?;
        if !input[close + 1..].trim().is_empty() {
            return Err(invalid());
        }

        let address = input[open + 1..close].trim();
        validate_address(address).map_err(|_| invalid())?;

        let name = unquote(input[..open].trim());
        Ok(Self {
            name: (!name.is_empty()).then_some(name),
            address: address.to_string(),
        })
    }

    /// Parses a comma separated list of mailboxes. Empty entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] for the first entry that fails to parse.
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        split_list(input)
            .into_iter()
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            None => f.write_str(&self.address),
            Some(name) if needs_encoding(name) => {
                write!(f, "{} <{}>", encode_rfc2047(name, "utf-8"), self.address)
            }
            Some(name) if name.contains(|c| SPECIALS.contains(c)) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{name} <{}>", self.address),
        }
    }
}

fn validate_address(address: &str) -> Result<()> {
    let invalid = || Error::InvalidAddress(address.to_string());

    if address.chars().any(|c| c.is_whitespace() || c.is_control() || "<>,\"".contains(c)) {
        return Err(invalid());
    }
    let (local, domain) = address.rsplit_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.is_empty() || domain.starts_with('.') || domain.ends_with('.') {
        return Err(invalid());
    }
    Ok(())
}

/// Byte offset of the first `needle` outside a quoted string.
fn find_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            c if c == needle && !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn split_list(input: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut rest = input;
    loop {
        // Commas inside quotes or angle brackets do not separate entries
        let mut quoted = false;
        let mut escaped = false;
        let mut angle = false;
        let split = rest.char_indices().find(|&(_, c)| {
            match c {
                _ if escaped => escaped = false,
                '\\' if quoted => escaped = true,
                '"' if !angle => quoted = !quoted,
                '<' if !quoted => angle = true,
                '>' if !quoted => angle = false,
                ',' if !quoted && !angle => return true,
                _ => {}
            }
            false
        });
        match split {
            Some((i, _)) => {
                entries.push(&rest[..i]);
                rest = &rest[i + 1..];
            }
            None => {
                entries.push(rest);
                return entries;
            }
        }
    }
}

fn unquote(name: &str) -> String {
    let Some(inner) = name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) else {
        return name.to_string();
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

    #[test]
    fn test_bare_address() {
        let mb = Mailbox::parse("  user@example.com ").unwrap();
        assert_eq!(mb.address, "user@example.com");
        assert!(mb.name.is_none());
        assert_eq!(mb.to_string(), "user@example.com");
    }

    #[test]
    fn test_named_address() {
        let mb = Mailbox::parse("Jane Doe <jane@example.com>").unwrap();
        assert_eq!(mb.name.as_deref(), Some("Jane Doe"));
        assert_eq!(mb.address, "jane@example.com");
        assert_eq!(mb.to_string(), "Jane Doe <jane@example.com>");
    }

    #[test]
    fn test_angle_only() {
        let mb = Mailbox::parse("<jane@example.com>").unwrap();
        assert!(mb.name.is_none());
    }

    #[test]
    fn test_quoted_name() {
        let mb = Mailbox::parse(r#""Doe, Jane \"JD\"" <jane@example.com>"#).unwrap();
        assert_eq!(mb.name.as_deref(), Some(r#"Doe, Jane "JD""#));
        assert_eq!(mb.to_string(), r#""Doe, Jane \"JD\"" <jane@example.com>"#);
    }

    #[test]
    fn test_non_ascii_name_is_encoded() {
        let mb = Mailbox::new("j@example.com").unwrap().with_name("Jörg");
        assert_eq!(mb.to_string(), "=?utf-8?B?SsO2cmc=?= <j@example.com>");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "no-at-sign",
            "@example.com",
            "user@",
            "user@.com",
            "a b@example.com",
            "Jane <jane@example.com",
            "Jane <jane@example.com> trailing",
            "Jane <>",
        ] {
            assert!(
                matches!(Mailbox::parse(bad), Err(Error::InvalidAddress(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_list() {
        let list = Mailbox::parse_list(
            r#"a@example.com, "Last, First" <b@example.com>,, Carl <c@example.com>"#,
        )
        .unwrap();
        let addrs: Vec<&str> = list.iter().map(|m| m.address.as_str()).collect();
        assert_eq!(addrs, vec!["a@example.com", "b@example.com", "c@example.com"]);
        assert_eq!(list[1].name.as_deref(), Some("Last, First"));
    }

    #[test]
    fn test_parse_list_empty_and_errors() {
        assert!(Mailbox::parse_list("  ").unwrap().is_empty());
        assert!(Mailbox::parse_list("a@example.com, nope").is_err());
    }
}

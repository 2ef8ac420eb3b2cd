//! Ordered message headers.

use crate::error::{Error, Result};
use std::fmt;

/// Collection of email headers, written in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid field name or the value
    /// contains a bare line break.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate(&name, &value)?;
        self.headers.push((name, value));
        Ok(())
    }

    /// Sets a header, replacing any existing values in place.
    ///
    /// # Errors
    ///
    /// Same as [`Headers::add`].
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        validate(&name, &value)?;

        match self.position(&name) {
            Some(index) => {
                self.headers[index].1 = value;
                let mut seen = 0;
                self.headers.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.headers.push((name, value)),
        }
        Ok(())
    }

    /// Gets the first value for a header, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.headers[i].1.as_str())
    }

    /// Returns true if no headers are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

fn validate(name: &str, value: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
        return Err(Error::InvalidHeader(format!("bad field name {name:?}")));
    }
    // Only folded continuations ("\r\n" + whitespace) may break a value
    let mut rest = value;
    while let Some(pos) = rest.find(['\r', '\n']) {
        let tail = &rest[pos..];
        if !(tail.starts_with("\r\n ") || tail.starts_with("\r\n\t")) {
            return Err(Error::InvalidHeader(format!("line break in {name}")));
        }
        rest = &tail[3..];
    }
    Ok(())
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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

    #[test]
    fn test_headers_keep_order() {
        let mut headers = Headers::new();
        headers.add("From", "a@example.com").unwrap();
        headers.add("To", "b@example.com").unwrap();
        headers.add("Subject", "Hi").unwrap();

        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["From", "To", "Subject"]);
        assert_eq!(
            headers.to_string(),
            "From: a@example.com\r\nTo: b@example.com\r\nSubject: Hi\r\n"
        );
    }

    #[test]
    fn test_headers_get_case_insensitive() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain").unwrap();
        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert!(headers.get("Subject").is_none());
    }

    #[test]
    fn test_headers_set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.add("To", "alice@example.com").unwrap();
        headers.add("Subject", "x").unwrap();
        headers.add("to", "bob@example.com").unwrap();

        headers.set("To", "charlie@example.com").unwrap();
        let all: Vec<(&str, &str)> = headers.iter().collect();
        assert_eq!(
            all,
            vec![("To", "charlie@example.com"), ("Subject", "x")]
        );
    }

    #[test]
    fn test_headers_reject_injection() {
        let mut headers = Headers::new();
        assert!(headers.add("Subject", "hi\r\nBcc: evil@example.com").is_err());
        assert!(headers.add("Subject", "hi\nthere").is_err());
        assert!(headers.add("Bad Name", "x").is_err());
        assert!(headers.add("", "x").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_headers_allow_folding() {
        let mut headers = Headers::new();
        headers
            .add("Subject", "=?utf-8?B?w7w=?=\r\n =?utf-8?B?w7w=?=")
            .unwrap();
        assert!(!headers.is_empty());
    }
}

//! Envelope address type.

use crate::error::{Error, Result};

/// Bare mailbox address used in `MAIL FROM` and `RCPT TO`.
///
/// Display names and angle brackets are the address parser's business; this
/// type only guarantees the value is safe to splice into a command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address is empty, has no single
    /// `@` with non-empty sides, or contains whitespace, control characters
    /// or angle brackets.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the address, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::Validation("address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::Validation(format!(
                "address contains illegal characters: {addr:?}"
            )));
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return Err(Error::Validation(format!("address must contain @: {addr}")));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::Validation(format!(
                "local and domain parts cannot be empty: {addr}"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Address {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for Address {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_bracketed_literal_domain() {
        let addr = Address::new("anonymous@[127.0.0.1]").unwrap();
        assert_eq!(addr.to_string(), "anonymous@[127.0.0.1]");
    }

    #[test]
    fn test_invalid_address_no_at() {
        assert!(matches!(
            Address::new("userexample.com"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_invalid_address_empty() {
        assert!(Address::new("").is_err());
    }

    #[test]
    fn test_invalid_address_empty_parts() {
        assert!(Address::new("@example.com").is_err());
        assert!(Address::new("user@").is_err());
    }

    #[test]
    fn test_rejects_command_injection() {
        assert!(Address::new("a@b.com>\r\nRCPT TO:<evil@x.com").is_err());
        assert!(Address::new("Name <a@b.com>").is_err());
        assert!(Address::new("a b@c.com").is_err());
    }
}

//! Token endpoint configurations.

use crate::error::{Error, Result};
use url::Url;

/// Google's token endpoint, used when no other is configured.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// `OAuth2` provider, as far as token refresh is concerned.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Provider name (e.g., "Google").
    pub name: String,
    /// Token endpoint URL.
    pub token_url: Url,
}

impl Provider {
    /// Creates a provider with a custom token endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or not HTTP(S).
    pub fn new(name: impl Into<String>, token_url: impl AsRef<str>) -> Result<Self> {
        let token_url = Url::parse(token_url.as_ref())?;
        if !matches!(token_url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "token_url must be http or https: {token_url}"
            )));
        }
        Ok(Self {
            name: name.into(),
            token_url,
        })
    }

    /// Google (Gmail SMTP, scope `https://mail.google.com/`).
    ///
    /// # Errors
    ///
    /// Returns an error if URL parsing fails.
    pub fn google() -> Result<Self> {
        Self::new("Google", GOOGLE_TOKEN_URL)
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
    fn test_google_provider() {
        let provider = Provider::google().unwrap();
        assert_eq!(provider.name, "Google");
        assert_eq!(provider.token_url.as_str(), GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_custom_provider() {
        let provider = Provider::new("Local", "http://127.0.0.1:8080/token").unwrap();
        assert_eq!(provider.token_url.port(), Some(8080));
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            Provider::new("Bad", "not a url"),
            Err(Error::UrlError(_))
        ));
        assert!(matches!(
            Provider::new("Bad", "ftp://example.com/token"),
            Err(Error::InvalidConfig(_))
        ));
    }
}

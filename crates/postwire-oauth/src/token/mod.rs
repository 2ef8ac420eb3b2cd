//! Access tokens and token endpoint payloads.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Tokens within this many seconds of expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Access token with refresh metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Token {
    /// Access token string; empty until the first refresh.
    pub access_token: String,
    /// Expiration time, if the endpoint reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Refresh token for obtaining new access tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Token {
    /// Creates a token with no expiry.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    /// Builds a token from a token endpoint response.
    ///
    /// # Errors
    ///
    /// Returns an error if the response carries no access token.
    pub fn from_response(response: TokenResponse) -> Result<Self> {
        if response.access_token.is_empty() {
            return Err(Error::InvalidResponse("empty access_token".into()));
        }

        let expires_at = response
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(i64::from(secs)));

        Ok(Self {
            access_token: response.access_token,
            expires_at,
            refresh_token: response.refresh_token,
        })
    }

    /// Checks if the token is expired, with a 60 second margin.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|exp| Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= exp)
    }

    /// Returns true if the access token can be sent as is.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiration time.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns the refresh token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRefreshToken`] if none is set.
    pub fn refresh_token(&self) -> Result<&str> {
        self.refresh_token.as_deref().ok_or(Error::NoRefreshToken)
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type, usually `Bearer`.
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Rotated refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Error response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error.
    #[must_use]
    pub fn into_error(self) -> Error {
        Error::oauth_error(self.error, self.error_description)
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
    fn test_empty_token_is_not_usable() {
        let token = Token::default().with_refresh_token("refresh");
        assert!(!token.is_usable());
        assert_eq!(token.refresh_token().unwrap(), "refresh");
    }

    #[test]
    fn test_missing_refresh_token() {
        assert!(matches!(
            Token::new("access").refresh_token(),
            Err(Error::NoRefreshToken)
        ));
    }

    #[test]
    fn test_token_expiration_margin() {
        let stale = Token::new("access").with_expires_at(Utc::now() + Duration::seconds(30));
        assert!(stale.is_expired());
        assert!(!stale.is_usable());

        let fresh = Token::new("access").with_expires_at(Utc::now() + Duration::seconds(3600));
        assert!(fresh.is_usable());

        assert!(Token::new("forever").is_usable());
    }

    #[test]
    fn test_token_from_response() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"ya29.x","token_type":"Bearer","expires_in":3599}"#,
        )
        .unwrap();
        let token = Token::from_response(response).unwrap();
        assert_eq!(token.access_token, "ya29.x");
        assert!(token.expires_at.is_some());
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn test_empty_access_token_rejected() {
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":""}"#).unwrap();
        assert!(matches!(
            Token::from_response(response),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_error_response() {
        let response: ErrorResponse =
            serde_json::from_str(r#"{"error":"invalid_grant"}"#).unwrap();
        let err = response.into_error();
        assert_eq!(err.to_string(), "OAuth2 error: invalid_grant - ");
    }
}

//! SASL payloads for SMTP `AUTH`.
//!
//! - PLAIN (RFC 4616): `\0<user>\0<password>`
//! - XOAUTH2 (Google/Microsoft): `user=<user>\x01auth=Bearer <token>\x01\x01`
//!
//! Both are base64 encoded on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// Generates the PLAIN initial response.
///
/// The authorization identity is left empty; some servers reject a non-empty one.
///
/// ```
/// use postwire_oauth::sasl::plain_response;
///
/// assert_eq!(plain_response("user", "pass"), "AHVzZXIAcGFzcw==");
/// ```
#[must_use]
pub fn plain_response(username: &str, password: &str) -> String {
    let auth_string = format!("\0{username}\0{password}");
    STANDARD.encode(auth_string.as_bytes())
}

/// Generates the XOAUTH2 initial response.
///
/// ```
/// use postwire_oauth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user@example.com", "ya29.a0...");
/// // Send: AUTH XOAUTH2 {response}
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    let auth_string = format!("user={user}\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
}

/// Parses the JSON error a server sends after a refused XOAUTH2 token:
/// `{"status":"401","schemes":"bearer","scope":"..."}`.
///
/// # Errors
///
/// Returns an error if the response is not that JSON shape.
pub fn parse_oauth_error(response: &str) -> Result<OAuthError, serde_json::Error> {
    serde_json::from_str(response)
}

/// Decodes the base64 payload of a `334` XOAUTH2 challenge.
///
/// Returns `None` if the payload is not base64 or not the JSON error shape.
#[must_use]
pub fn decode_challenge(payload: &str) -> Option<OAuthError> {
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    let json = std::str::from_utf8(&bytes).ok()?;
    parse_oauth_error(json).ok()
}

/// XOAUTH2 error payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthError {
    /// HTTP-style status, e.g. `"401"`.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: String,
    /// Scope required.
    #[serde(default)]
    pub scope: Option<String>,
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
    fn test_xoauth2_format() {
        let response = xoauth2_response("test@test.com", "abc");
        let decoded = STANDARD.decode(&response).unwrap();
        let decoded_str = String::from_utf8(decoded).unwrap();

        assert_eq!(decoded_str, "user=test@test.com\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_plain_response_format() {
        let response = plain_response("test", "pass");
        let decoded = STANDARD.decode(&response).unwrap();
        assert_eq!(decoded, b"\0test\0pass");
    }

    #[test]
    fn test_plain_response_utf8() {
        let response = plain_response("jörg", "pässword!");
        let decoded = String::from_utf8(STANDARD.decode(&response).unwrap()).unwrap();
        assert_eq!(decoded, "\0jörg\0pässword!");
    }

    #[test]
    fn test_parse_oauth_error() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        let error = parse_oauth_error(json).unwrap();

        assert_eq!(error.status, "401");
        assert_eq!(error.schemes, "bearer");
        assert_eq!(error.scope.as_deref(), Some("https://mail.google.com/"));
    }

    #[test]
    fn test_decode_challenge() {
        let payload = STANDARD.encode(r#"{"status":"400"}"#);
        let error = decode_challenge(&payload).unwrap();
        assert_eq!(error.status, "400");
        assert!(error.scope.is_none());
    }

    #[test]
    fn test_decode_challenge_garbage() {
        assert!(decode_challenge("!!!").is_none());
        assert!(decode_challenge(&STANDARD.encode("not json")).is_none());
        assert!(decode_challenge(&STANDARD.encode(r#"{"schemes":"bearer"}"#)).is_none());
    }
}

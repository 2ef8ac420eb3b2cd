//! Authentication mechanism selection and SASL payloads.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};
use crate::types::{AuthMechanism, Capabilities, Reply};

/// Base64 "Username:" challenge.
pub const LOGIN_USER_CHALLENGE: &str = "334 VXNlcm5hbWU6";
/// Base64 "Password:" challenge.
pub const LOGIN_PASS_CHALLENGE: &str = "334 UGFzc3dvcmQ6";
/// Upper bound on XOAUTH2 token refresh attempts per authentication.
pub const MAX_XOAUTH2_RETRIES: u32 = 200;

/// Credentials as the protocol sees them.
///
/// Token values are not stored here; when a token mechanism is selected the
/// protocol asks the driver for one with [`Event::TokenRequired`].
///
/// [`Event::TokenRequired`]: super::Event::TokenRequired
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSettings {
    /// Username for PLAIN and LOGIN.
    pub user: Option<String>,
    /// Password for PLAIN and LOGIN.
    pub pass: Option<String>,
    /// An XOAUTH token source is configured.
    pub xoauth: bool,
    /// An XOAUTH2 token source is configured.
    pub xoauth2: bool,
    /// Explicit mechanism override, e.g. `"login"`.
    pub method: Option<String>,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("xoauth", &self.xoauth)
            .field("xoauth2", &self.xoauth2)
            .field("method", &self.method)
            .finish()
    }
}

impl AuthSettings {
    /// Username and password credentials.
    #[must_use]
    pub fn login(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            pass: Some(pass.into()),
            ..Self::default()
        }
    }

    fn can_drive(&self, mechanism: AuthMechanism) -> bool {
        match mechanism {
            AuthMechanism::Plain | AuthMechanism::Login => {
                self.user.is_some() && self.pass.is_some()
            }
            AuthMechanism::XOAuth => self.xoauth,
            AuthMechanism::XOAuth2 => self.xoauth2,
        }
    }

    pub(crate) fn credentials(&self) -> Result<(&str, &str)> {
        match (self.user.as_deref(), self.pass.as_deref()) {
            (Some(user), Some(pass)) => Ok((user, pass)),
            _ => Err(Error::Protocol(
                "username and password required for PLAIN/LOGIN".into(),
            )),
        }
    }
}

/// Picks the mechanism to run.
///
/// Precedence: XOAUTH token if the server offers XOAUTH, XOAUTH2 source if
/// the server offers XOAUTH2, the explicit override, then the first offered
/// mechanism the credentials can drive, then PLAIN.
///
/// # Errors
///
/// Returns a protocol error for an unknown override or when the chosen
/// mechanism has no matching credentials.
pub fn select_mechanism(settings: &AuthSettings, caps: &Capabilities) -> Result<AuthMechanism> {
    let mechanism = if settings.xoauth && caps.supports(AuthMechanism::XOAuth) {
        AuthMechanism::XOAuth
    } else if settings.xoauth2 && caps.supports(AuthMechanism::XOAuth2) {
        AuthMechanism::XOAuth2
    } else if let Some(method) = &settings.method {
        AuthMechanism::parse(method).ok_or_else(|| {
            Error::Protocol(format!(
                "Unknown authentication method - {}",
                method.trim().to_ascii_uppercase()
            ))
        })?
    } else {
        caps.auth
            .iter()
            .copied()
            .find(|m| settings.can_drive(*m))
            .unwrap_or(AuthMechanism::Plain)
    };

    if !settings.can_drive(mechanism) {
        return Err(Error::Protocol(format!(
            "no credentials configured for {mechanism}"
        )));
    }

    Ok(mechanism)
}

/// Live state of one authentication exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    /// Mechanism being driven.
    pub mechanism: AuthMechanism,
    /// XOAUTH2 refresh attempts so far.
    pub retries: u32,
}

impl AuthContext {
    pub(crate) const fn new(mechanism: AuthMechanism) -> Self {
        Self {
            mechanism,
            retries: 0,
        }
    }

    /// Returns true if another token refresh is allowed for this error status.
    #[must_use]
    pub fn may_refresh(&self, status: &str) -> bool {
        self.retries < MAX_XOAUTH2_RETRIES && matches!(status, "400" | "401")
    }
}

/// Base64 of a UTF-8 string, as sent in LOGIN responses.
pub(crate) fn encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Decodes the JSON error status carried by an XOAUTH2 `334` challenge.
pub(crate) fn xoauth2_error_status(reply: &Reply) -> Option<String> {
    let payload = reply.text.split_once(' ').map(|(_, rest)| rest)?;
    postwire_oauth::sasl::decode_challenge(payload).map(|err| err.status)
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
    use crate::types::ReplyCode;

    fn caps(text: &str) -> Capabilities {
        Capabilities::parse(text)
    }

    #[test]
    fn xoauth_wins_when_offered() {
        let settings = AuthSettings {
            xoauth: true,
            xoauth2: true,
            ..AuthSettings::login("u", "p")
        };
        let m = select_mechanism(&settings, &caps("250 AUTH PLAIN XOAUTH XOAUTH2")).unwrap();
        assert_eq!(m, AuthMechanism::XOAuth);
    }

    #[test]
    fn xoauth2_before_override() {
        let settings = AuthSettings {
            xoauth2: true,
            method: Some("login".into()),
            ..AuthSettings::login("u", "p")
        };
        let m = select_mechanism(&settings, &caps("250 AUTH LOGIN XOAUTH2")).unwrap();
        assert_eq!(m, AuthMechanism::XOAuth2);
    }

    #[test]
    fn override_used_when_no_token_mechanism_applies() {
        let settings = AuthSettings {
            method: Some(" login ".into()),
            ..AuthSettings::login("u", "p")
        };
        let m = select_mechanism(&settings, &caps("250 AUTH PLAIN")).unwrap();
        assert_eq!(m, AuthMechanism::Login);
    }

    #[test]
    fn unknown_override_is_protocol_error() {
        let settings = AuthSettings {
            method: Some("cram-md5".into()),
            ..AuthSettings::login("u", "p")
        };
        let err = select_mechanism(&settings, &caps("250 AUTH PLAIN")).unwrap_err();
        assert!(err.to_string().contains("CRAM-MD5"));
    }

    #[test]
    fn first_offered_mechanism() {
        let settings = AuthSettings::login("u", "p");
        let m = select_mechanism(&settings, &caps("250 AUTH LOGIN PLAIN")).unwrap();
        assert_eq!(m, AuthMechanism::Login);
    }

    #[test]
    fn skips_offered_mechanisms_without_credentials() {
        let settings = AuthSettings::login("u", "p");
        let m = select_mechanism(&settings, &caps("250 AUTH XOAUTH2 PLAIN")).unwrap();
        assert_eq!(m, AuthMechanism::Plain);
    }

    #[test]
    fn defaults_to_plain() {
        let settings = AuthSettings::login("u", "p");
        let m = select_mechanism(&settings, &Capabilities::default()).unwrap();
        assert_eq!(m, AuthMechanism::Plain);
    }

    #[test]
    fn token_only_without_server_support_fails() {
        let settings = AuthSettings {
            xoauth2: true,
            ..AuthSettings::default()
        };
        assert!(select_mechanism(&settings, &caps("250 AUTH PLAIN")).is_err());
    }

    #[test]
    fn refresh_bounded() {
        let mut ctx = AuthContext::new(AuthMechanism::XOAuth2);
        assert!(ctx.may_refresh("401"));
        assert!(ctx.may_refresh("400"));
        assert!(!ctx.may_refresh("500"));
        ctx.retries = MAX_XOAUTH2_RETRIES;
        assert!(!ctx.may_refresh("401"));
    }

    #[test]
    fn decodes_xoauth2_status() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        let reply = Reply::new(
            ReplyCode::AUTH_CONTINUE,
            format!("334 {}", STANDARD.encode(json)),
        );
        assert_eq!(xoauth2_error_status(&reply).as_deref(), Some("401"));

        let reply = Reply::new(ReplyCode::AUTH_CONTINUE, "334 bm90IGpzb24=");
        assert_eq!(xoauth2_error_status(&reply), None);
    }

    #[test]
    fn debug_hides_password() {
        let out = format!("{:?}", AuthSettings::login("user", "hunter2"));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("user"));
    }
}

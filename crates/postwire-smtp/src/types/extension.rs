//! Capabilities advertised in the EHLO reply.

use std::fmt;

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    Plain,
    /// LOGIN - legacy plaintext, username and password challenges
    Login,
    /// `XOAUTH` - legacy Google token
    XOAuth,
    /// `XOAUTH2` - `OAuth2` bearer token (Google/Microsoft)
    XOAuth2,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "XOAUTH" => Some(Self::XOAuth),
            "XOAUTH2" => Some(Self::XOAuth2),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::XOAuth => "XOAUTH",
            Self::XOAuth2 => "XOAUTH2",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the server offered in its EHLO reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// STARTTLS was advertised.
    pub starttls: bool,
    /// Known AUTH mechanisms, in the order the server listed them.
    pub auth: Vec<AuthMechanism>,
}

impl Capabilities {
    /// Scans a full EHLO reply text.
    ///
    /// Both `AUTH PLAIN LOGIN` and the legacy `AUTH=PLAIN` form are
    /// recognized; mechanism lists may be space or comma separated.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut caps = Self::default();

        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            // Drop "250-" / "250 "
            let keyword_line = match line.as_bytes() {
                [a, b, c, sep, ..]
                    if a.is_ascii_digit()
                        && b.is_ascii_digit()
                        && c.is_ascii_digit()
                        && (*sep == b'-' || *sep == b' ') =>
                {
                    &line[4..]
                }
                _ => line,
            };
            let keyword_line = keyword_line.trim();

            if keyword_line.eq_ignore_ascii_case("STARTTLS") {
                caps.starttls = true;
                continue;
            }

            let Some(prefix) = keyword_line.get(..4) else {
                continue;
            };
            if !prefix.eq_ignore_ascii_case("AUTH") {
                continue;
            }
            let rest = &keyword_line[4..];
            if !(rest.starts_with(' ') || rest.starts_with('=')) {
                continue;
            }

            for token in rest.split(|c: char| c == ' ' || c == ',' || c == '=') {
                if let Some(mechanism) = AuthMechanism::parse(token)
                    && !caps.auth.contains(&mechanism)
                {
                    caps.auth.push(mechanism);
                }
            }
        }

        caps
    }

    /// Checks whether a mechanism was advertised.
    #[must_use]
    pub fn supports(&self, mechanism: AuthMechanism) -> bool {
        self.auth.contains(&mechanism)
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

    mod capabilities_tests {
        use super::*;

        #[test]
        fn starttls_and_auth() {
            let caps = Capabilities::parse(
                "250-smtp.example.com Hello\r\n250-STARTTLS\r\n250 AUTH LOGIN PLAIN",
            );
            assert!(caps.starttls);
            assert_eq!(caps.auth, vec![AuthMechanism::Login, AuthMechanism::Plain]);
        }

        #[test]
        fn starttls_lowercase() {
            let caps = Capabilities::parse("250-mx\r\n250 starttls");
            assert!(caps.starttls);
        }

        #[test]
        fn no_starttls_token() {
            let caps = Capabilities::parse("250-mx\r\n250-SIZE 1000\r\n250 AUTH PLAIN");
            assert!(!caps.starttls);
        }

        #[test]
        fn starttls_in_greeting_text_is_not_a_capability() {
            let caps = Capabilities::parse("250-mx says STARTTLS soon\r\n250 8BITMIME");
            assert!(!caps.starttls);
        }

        #[test]
        fn legacy_equals_form_and_commas() {
            let caps =
                Capabilities::parse("250-mx\r\n250-AUTH=LOGIN,PLAIN\r\n250 AUTH PLAIN XOAUTH2");
            assert_eq!(
                caps.auth,
                vec![
                    AuthMechanism::Login,
                    AuthMechanism::Plain,
                    AuthMechanism::XOAuth2
                ]
            );
        }

        #[test]
        fn xoauth_and_xoauth2_are_distinct() {
            let caps = Capabilities::parse("250 AUTH XOAUTH2");
            assert!(caps.supports(AuthMechanism::XOAuth2));
            assert!(!caps.supports(AuthMechanism::XOAuth));

            let caps = Capabilities::parse("250 AUTH XOAUTH");
            assert!(caps.supports(AuthMechanism::XOAuth));
            assert!(!caps.supports(AuthMechanism::XOAuth2));
        }

        #[test]
        fn unknown_mechanisms_skipped() {
            let caps = Capabilities::parse("250 AUTH CRAM-MD5 GSSAPI PLAIN");
            assert_eq!(caps.auth, vec![AuthMechanism::Plain]);
        }

        #[test]
        fn authentication_keyword_is_not_auth() {
            let caps = Capabilities::parse("250 AUTHENTICATED PLAIN");
            assert!(caps.auth.is_empty());
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn parse_case_insensitive() {
            assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse(" Login "), Some(AuthMechanism::Login));
            assert_eq!(AuthMechanism::parse("xoauth"), Some(AuthMechanism::XOAuth));
            assert_eq!(AuthMechanism::parse("XOAUTH2"), Some(AuthMechanism::XOAuth2));
            assert_eq!(AuthMechanism::parse("CRAM-MD5"), None);
        }

        #[test]
        fn as_str() {
            assert_eq!(AuthMechanism::Plain.as_str(), "PLAIN");
            assert_eq!(AuthMechanism::Login.as_str(), "LOGIN");
            assert_eq!(AuthMechanism::XOAuth.as_str(), "XOAUTH");
            assert_eq!(AuthMechanism::XOAuth2.to_string(), "XOAUTH2");
        }
    }
}

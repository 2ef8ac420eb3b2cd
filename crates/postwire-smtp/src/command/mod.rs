//! SMTP command builder.

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (PLAIN credentials or an OAuth token)
        initial_response: Option<String>,
    },
    /// A bare SASL continuation line; may be empty.
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: Address,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Serializes the command to bytes, CRLF included.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = self.line(false).into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the command line for the wire transcript, with credentials
    /// replaced by a placeholder.
    #[must_use]
    pub fn redacted(&self) -> String {
        self.line(true)
    }

    fn line(&self, redact: bool) -> String {
        const HIDDEN: &str = "<redacted>";
        match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response: Some(resp),
            } => {
                let resp = if redact { HIDDEN } else { resp.as_str() };
                format!("AUTH {mechanism} {resp}")
            }
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {mechanism}"),
            Self::AuthResponse(resp) if redact && !resp.is_empty() => HIDDEN.to_string(),
            Self::AuthResponse(resp) => resp.clone(),
            Self::MailFrom { from } => format!("MAIL FROM:<{from}>"),
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
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
    fn test_greeting_commands() {
        let cmd = Command::Ehlo {
            hostname: "client.example.com".to_string(),
        };
        assert_eq!(cmd.serialize(), b"EHLO client.example.com\r\n");

        let cmd = Command::Helo {
            hostname: "[127.0.0.1]".to_string(),
        };
        assert_eq!(cmd.serialize(), b"HELO [127.0.0.1]\r\n");

        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
    }

    #[test]
    fn test_auth_commands() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.serialize(), b"AUTH PLAIN AHVzZXIAcGFzcw==\r\n");

        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTH LOGIN\r\n");

        assert_eq!(Command::AuthResponse(String::new()).serialize(), b"\r\n");
    }

    #[test]
    fn test_redaction() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::XOAuth2,
            initial_response: Some("dXNlcj1h".to_string()),
        };
        assert_eq!(cmd.redacted(), "AUTH XOAUTH2 <redacted>");
        assert_eq!(
            Command::AuthResponse("c2VjcmV0".into()).redacted(),
            "<redacted>"
        );
        assert_eq!(Command::AuthResponse(String::new()).redacted(), "");
        assert_eq!(Command::Data.redacted(), "DATA");
    }

    #[test]
    fn test_envelope_commands() {
        let cmd = Command::MailFrom {
            from: Address::new("sender@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"MAIL FROM:<sender@example.com>\r\n");

        let cmd = Command::RcptTo {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.serialize(), b"RCPT TO:<recipient@example.com>\r\n");
    }

    #[test]
    fn test_data_and_quit() {
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }
}

//! Error types for SMTP operations.

use std::fmt;
use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// TCP connect (and implicit TLS handshake) did not finish in time.
    Connection,
    /// The server never sent its 220 greeting.
    Greeting,
    /// A send transaction did not complete in time.
    Send,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connection => "connection",
            Self::Greeting => "greeting",
            Self::Send => "send",
        })
    }
}

/// Protocol step at which the server answered with something unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Initial 220 greeting.
    Greeting,
    /// HELO, after EHLO or STARTTLS was refused.
    Helo,
    /// AUTH LOGIN challenge exchange.
    AuthLogin,
    /// A reply arrived while no command was outstanding.
    Idle,
    /// RCPT TO answered with 421.
    RcptTo,
    /// DATA was refused.
    Data,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greeting => "greeting",
            Self::Helo => "EHLO/HELO",
            Self::AuthLogin => "AUTH LOGIN",
            Self::Idle => "idle",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
        })
    }
}

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Send data or envelope rejected before any network activity.
    #[error("Invalid send data: {0}")]
    Validation(String),

    /// TCP connect or name resolution failed.
    #[error("Could not connect to {host}:{port}: {source}")]
    Connect {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A connection, greeting or send timer fired.
    #[error("{kind} timeout after {after:?}")]
    Timeout {
        /// Which timer fired.
        kind: TimeoutKind,
        /// Configured duration.
        after: Duration,
    },

    /// The server answered with a code the current step cannot accept.
    #[error("Unexpected {stage} reply {code}: {message}")]
    UnexpectedReply {
        /// Protocol step.
        stage: Stage,
        /// Reply code.
        code: u16,
        /// Full reply text.
        message: String,
    },

    /// Protocol violation (malformed reply, bad state, unknown auth method).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication rejected.
    #[error("Invalid login - {code}: {message}")]
    Auth {
        /// Reply code.
        code: u16,
        /// Full reply text.
        message: String,
    },

    /// MAIL FROM rejected.
    #[error("Sender rejected {code}: {message}")]
    Sender {
        /// Reply code.
        code: u16,
        /// Full reply text.
        message: String,
    },

    /// Every RCPT TO was rejected.
    #[error("All recipients were rejected: {rejected:?} (last reply {code}: {message})")]
    Recipients {
        /// Rejected recipient addresses, in command order.
        rejected: Vec<String>,
        /// Code of the last RCPT TO reply.
        code: u16,
        /// Text of the last RCPT TO reply.
        message: String,
    },

    /// The server refused the message after the body was sent.
    #[error("Message rejected {code}: {message}")]
    MessageRejected {
        /// Reply code.
        code: u16,
        /// Full reply text.
        message: String,
    },

    /// Socket failure or abrupt close.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// An XOAUTH or XOAUTH2 token could not be produced.
    #[error("Token error: {0}")]
    Token(#[from] postwire_oauth::Error),

    /// A sequential send is already in flight.
    #[error("Previous sequential send has not completed yet")]
    Busy,

    /// The connection has already been closed.
    #[error("Connection closed")]
    Closed,
}

impl From<postwire_mime::Error> for Error {
    fn from(err: postwire_mime::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl Error {
    /// Returns the SMTP reply code carried by this error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedReply { code, .. }
            | Self::Auth { code, .. }
            | Self::Sender { code, .. }
            | Self::Recipients { code, .. }
            | Self::MessageRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 500 && code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.code(), Some(code) if code >= 400 && code < 500)
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
    fn classifies_reply_codes() {
        let err = Error::Sender {
            code: 550,
            message: "550 no such user".into(),
        };
        assert!(err.is_permanent());
        assert!(!err.is_transient());

        let err = Error::MessageRejected {
            code: 451,
            message: "451 try later".into(),
        };
        assert!(err.is_transient());
        assert_eq!(err.code(), Some(451));
    }

    #[test]
    fn non_reply_errors_have_no_code() {
        assert_eq!(Error::Busy.code(), None);
        assert!(!Error::Closed.is_permanent());
        assert!(!Error::Protocol("x".into()).is_transient());
    }

    #[test]
    fn timeout_display() {
        let err = Error::Timeout {
            kind: TimeoutKind::Send,
            after: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "send timeout after 50ms");
    }

    #[test]
    fn mime_errors_become_validation() {
        let err: Error = postwire_mime::Error::InvalidAddress("nope".into()).into();
        assert!(matches!(err, Error::Validation(_)));
    }
}

//! Protocol state and envelope types.

use std::collections::VecDeque;

use crate::types::{Address, AuthMechanism};

/// Which reply the connection is waiting for, and how to read it.
///
/// Exactly one state is active; it alone interprets the next reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Socket not yet connected.
    #[default]
    Connecting,
    /// Waiting for the 220 greeting.
    Greeting,
    /// EHLO sent.
    Ehlo,
    /// HELO sent after EHLO or STARTTLS was refused.
    Helo,
    /// STARTTLS sent.
    StartTls,
    /// Server accepted STARTTLS; the driver is upgrading the transport.
    TlsHandshake,
    /// `AUTH LOGIN` sent, expecting the username challenge.
    AuthLoginUser,
    /// Username sent, expecting the password challenge.
    AuthLoginPass,
    /// Waiting for the driver to supply a token for this mechanism.
    AuthToken(AuthMechanism),
    /// Credentials sent, waiting for the verdict.
    AuthComplete,
    /// Empty line sent after an XOAUTH2 error; the next reply triggers a token refresh.
    XOAuth2Retry,
    /// Ready for the next transaction.
    Idle,
    /// MAIL FROM sent.
    MailFrom,
    /// RCPT TO sent for the current recipient.
    RcptTo,
    /// DATA sent.
    Data,
    /// Body bytes pass through to the socket.
    Streaming,
    /// End-of-data sent, waiting for the final status.
    DataEnd,
    /// QUIT sent.
    Quit,
    /// Connection torn down.
    Closed,
}

impl State {
    /// Returns `true` while the session is still being set up.
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Greeting
                | Self::Ehlo
                | Self::Helo
                | Self::StartTls
                | Self::TlsHandshake
                | Self::AuthLoginUser
                | Self::AuthLoginPass
                | Self::AuthToken(_)
                | Self::AuthComplete
                | Self::XOAuth2Retry
        )
    }

    /// Returns `true` while a mail transaction is in progress.
    #[must_use]
    pub const fn in_transaction(self) -> bool {
        matches!(
            self,
            Self::MailFrom | Self::RcptTo | Self::Data | Self::Streaming | Self::DataEnd
        )
    }
}

/// Sender and recipients for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender; `anonymous@<client name>` when absent.
    pub from: Option<Address>,
    /// Recipients, in the order RCPT TO is sent.
    pub to: Vec<Address>,
}

impl Envelope {
    /// Creates an envelope.
    #[must_use]
    pub const fn new(from: Option<Address>, to: Vec<Address>) -> Self {
        Self { from, to }
    }
}

/// Per-transaction bookkeeping owned by the protocol.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) queue: VecDeque<Address>,
    pub(crate) current: Option<Address>,
    pub(crate) rejected: Vec<String>,
    pub(crate) accepted: usize,
}

impl Transaction {
    pub(crate) fn new(to: Vec<Address>) -> Self {
        Self {
            queue: to.into(),
            current: None,
            rejected: Vec::new(),
            accepted: 0,
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
    fn test_default_state() {
        assert_eq!(State::default(), State::Connecting);
    }

    #[test]
    fn test_state_groups() {
        assert!(State::Greeting.is_handshake());
        assert!(State::AuthToken(AuthMechanism::XOAuth2).is_handshake());
        assert!(!State::Idle.is_handshake());
        assert!(State::RcptTo.in_transaction());
        assert!(State::DataEnd.in_transaction());
        assert!(!State::Quit.in_transaction());
    }

    #[test]
    fn test_transaction_queue_order() {
        let to = vec![
            Address::new("a@x.com").unwrap(),
            Address::new("b@x.com").unwrap(),
        ];
        let mut tx = Transaction::new(to);
        assert_eq!(tx.queue.pop_front().unwrap().as_str(), "a@x.com");
        assert_eq!(tx.queue.pop_front().unwrap().as_str(), "b@x.com");
        assert!(tx.queue.is_empty());
    }
}

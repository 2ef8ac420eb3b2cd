//! Sans-I/O SMTP client state machine.
//!
//! The protocol never touches a socket. The driver feeds it complete replies
//! with [`Protocol::handle_reply`], writes whatever [`Protocol::poll_transmit`]
//! hands out, and reacts to [`Protocol::poll_event`]:
//!
//! ```ignore
//! let mut protocol = Protocol::new(config);
//! protocol.connected()?;
//!
//! loop {
//!     while let Some(transmit) = protocol.poll_transmit() {
//!         socket.write_all(&transmit.data).await?;
//!     }
//!     match protocol.poll_event() {
//!         Some(Event::Idle) => break,
//!         Some(Event::StartTls) => { upgrade(&mut socket).await?; protocol.tls_established()?; }
//!         Some(Event::TokenRequired { mechanism, refresh }) => {
//!             protocol.provide_token(fetch(mechanism, refresh).await?)?;
//!         }
//!         _ => protocol.handle_reply(read_reply(&mut socket).await?)?,
//!     }
//! }
//! ```
//!
//! One command is outstanding at a time; the current [`State`] alone decides
//! how the next reply is read. Any error returned from a state transition
//! leaves the protocol in [`State::Closed`].

// Allow missing_const_for_fn since many functions can't be const in stable Rust.
#![allow(clippy::missing_const_for_fn)]

mod auth;
mod state;
mod transmit;

use std::collections::VecDeque;

pub use auth::{
    AuthContext, AuthSettings, LOGIN_PASS_CHALLENGE, LOGIN_USER_CHALLENGE, MAX_XOAUTH2_RETRIES,
    select_mechanism,
};
pub use state::{Envelope, State};
pub use transmit::Transmit;

use crate::command::Command;
use crate::error::{Error, Result, Stage};
use crate::types::{Address, AuthMechanism, Capabilities, Reply, ReplyCode};
use state::Transaction;

/// Tracing target for the wire transcript.
pub const TRANSCRIPT_TARGET: &str = "postwire_smtp::transcript";

/// Protocol-level settings.
#[derive(Debug, Clone, Default)]
pub struct ProtocolConfig {
    /// Name sent with EHLO/HELO.
    pub client_name: String,
    /// Upgrade with STARTTLS when the server offers it.
    pub starttls: bool,
    /// The transport is already encrypted.
    pub secure: bool,
    /// Credentials; `None` skips authentication.
    pub auth: Option<AuthSettings>,
    /// Log the wire transcript.
    pub debug: bool,
    /// Tag for transcript lines.
    pub instance_id: Option<String>,
}

/// Outcome of one finished transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Final status code.
    pub code: ReplyCode,
    /// Final status text, verbatim.
    pub response: String,
    /// Recipients the server refused.
    pub rejected: Vec<String>,
}

impl Delivery {
    /// Returns true if the server accepted the message.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// Events produced by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Handshake and authentication done; ready for a transaction.
    Idle,
    /// Server accepted STARTTLS. Upgrade the transport, then call
    /// [`Protocol::tls_established`].
    StartTls,
    /// A token is needed. Fetch one, then call [`Protocol::provide_token`].
    TokenRequired {
        /// Mechanism the token is for.
        mechanism: AuthMechanism,
        /// The previous token was refused; generate a fresh one.
        refresh: bool,
    },
    /// All RCPT TO replies are in; these recipients were refused.
    RecipientsRejected(Vec<String>),
    /// DATA accepted; body bytes may be written.
    ReadyForData,
    /// Final status for the message.
    Finished(Delivery),
    /// Server answered QUIT.
    Closed,
}

/// Sans-I/O SMTP client state machine.
#[derive(Debug)]
pub struct Protocol {
    config: ProtocolConfig,
    state: State,
    secure: bool,
    capabilities: Capabilities,
    auth: Option<AuthContext>,
    transaction: Option<Transaction>,
    rejected: Vec<String>,
    data_mode: bool,
    last_bytes: [u8; 2],
    outbound: VecDeque<Transmit>,
    events: VecDeque<Event>,
}

impl Protocol {
    /// Creates a protocol in [`State::Connecting`].
    #[must_use]
    pub fn new(config: ProtocolConfig) -> Self {
        let secure = config.secure;
        Self {
            config,
            state: State::Connecting,
            secure,
            capabilities: Capabilities::default(),
            auth: None,
            transaction: None,
            rejected: Vec::new(),
            data_mode: false,
            last_bytes: [0; 2],
            outbound: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns true once the transport is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns the capabilities from the latest EHLO.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns the authentication exchange in progress, if any.
    #[must_use]
    pub fn auth_context(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// Returns true while body writes pass through.
    #[must_use]
    pub fn is_data_mode(&self) -> bool {
        self.data_mode
    }

    /// Returns the next chunk of bytes to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outbound.pop_front()
    }

    /// Returns the next event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// The socket is connected; wait for the greeting.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the state is [`State::Connecting`].
    pub fn connected(&mut self) -> Result<()> {
        self.expect_state(State::Connecting, "connected")?;
        self.state = State::Greeting;
        Ok(())
    }

    /// Feeds one complete reply to the current state.
    ///
    /// # Errors
    ///
    /// Returns the error the current state raised for this reply; the
    /// protocol is closed afterwards.
    pub fn handle_reply(&mut self, reply: Reply) -> Result<()> {
        self.trace_server(&reply);
        tracing::trace!(state = ?self.state, code = %reply.code, "smtp reply");

        let result = match self.state {
            State::Greeting => self.on_greeting(&reply),
            State::Ehlo => self.on_ehlo(&reply),
            State::Helo => self.on_helo(&reply),
            State::StartTls => self.on_starttls(&reply),
            State::AuthLoginUser => self.on_login_challenge(&reply, false),
            State::AuthLoginPass => self.on_login_challenge(&reply, true),
            State::AuthComplete => self.on_auth_complete(&reply),
            State::XOAuth2Retry => {
                self.state = State::AuthToken(AuthMechanism::XOAuth2);
                self.events.push_back(Event::TokenRequired {
                    mechanism: AuthMechanism::XOAuth2,
                    refresh: true,
                });
                Ok(())
            }
            State::Idle => self.on_idle(&reply),
            State::MailFrom => self.on_mail_from(&reply),
            State::RcptTo => self.on_rcpt_to(&reply),
            State::Data => self.on_data(&reply),
            State::DataEnd => self.on_data_end(reply),
            State::Quit => {
                self.close();
                self.events.push_back(Event::Closed);
                Ok(())
            }
            State::Closed => Ok(()),
            State::Connecting | State::TlsHandshake | State::AuthToken(_) | State::Streaming => {
                Err(Error::Protocol(format!(
                    "unexpected reply in state {:?}: {}",
                    self.state, reply.text
                )))
            }
        };

        if result.is_err() {
            self.close();
        }
        result
    }

    /// The transport was upgraded to TLS; restart the handshake.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the state is [`State::TlsHandshake`].
    pub fn tls_established(&mut self) -> Result<()> {
        self.expect_state(State::TlsHandshake, "tls_established")?;
        self.secure = true;
        self.capabilities = Capabilities::default();
        self.send_ehlo();
        Ok(())
    }

    /// Supplies the token requested by [`Event::TokenRequired`].
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless a token was requested.
    pub fn provide_token(&mut self, token: String) -> Result<()> {
        let State::AuthToken(mechanism) = self.state else {
            return Err(Error::Protocol(format!(
                "provide_token called in state {:?}",
                self.state
            )));
        };
        self.send(Command::Auth {
            mechanism,
            initial_response: Some(token),
        });
        self.state = State::AuthComplete;
        Ok(())
    }

    /// Starts a transaction with `MAIL FROM`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an envelope without recipients, or a
    /// protocol error if the connection is not idle. Neither closes the
    /// connection.
    pub fn use_envelope(&mut self, envelope: Envelope) -> Result<()> {
        if self.state != State::Idle {
            return Err(Error::Protocol(format!(
                "cannot start a transaction in state {:?}",
                self.state
            )));
        }
        if envelope.to.is_empty() {
            return Err(Error::Validation("envelope has no recipients".into()));
        }

        let from = match envelope.from {
            Some(from) => from,
            None => Address::new(format!("anonymous@{}", self.config.client_name))?,
        };

        self.transaction = Some(Transaction::new(envelope.to));
        self.rejected.clear();
        self.send(Command::MailFrom { from });
        self.state = State::MailFrom;
        Ok(())
    }

    /// Queues body bytes. Returns `false` (and sends nothing) outside data mode.
    pub fn write(&mut self, chunk: &[u8]) -> bool {
        if !self.data_mode {
            return false;
        }
        if chunk.is_empty() {
            return true;
        }

        self.last_bytes = match chunk {
            [only] => [self.last_bytes[1], *only],
            [.., a, b] => [*a, *b],
            [] => self.last_bytes,
        };

        if self.config.debug {
            tracing::debug!(
                target: TRANSCRIPT_TARGET,
                instance = self.config.instance_id.as_deref().unwrap_or_default(),
                "C (DATA): {}",
                String::from_utf8_lossy(chunk).trim().replace('\n', "\n   ")
            );
        }
        self.outbound.push_back(Transmit::from(chunk));
        true
    }

    /// Terminates the body and waits for the final status.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the body is being streamed.
    pub fn end(&mut self) -> Result<()> {
        self.expect_state(State::Streaming, "end")?;

        let terminator: &[u8] = match self.last_bytes {
            [b'\r', b'\n'] => b".\r\n",
            [_, b'\r'] => b"\n.\r\n",
            _ => b"\r\n.\r\n",
        };
        self.outbound.push_back(Transmit::from(terminator));
        self.data_mode = false;
        self.state = State::DataEnd;
        Ok(())
    }

    /// Sends QUIT. A no-op once closed.
    pub fn quit(&mut self) {
        if matches!(self.state, State::Closed | State::Quit) {
            return;
        }
        self.data_mode = false;
        self.send(Command::Quit);
        self.state = State::Quit;
    }

    /// Tears the session down. Idempotent.
    pub fn close(&mut self) {
        self.state = State::Closed;
        self.data_mode = false;
        self.auth = None;
        self.transaction = None;
        self.outbound.clear();
    }

    fn expect_state(&self, expected: State, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{operation} called in state {:?}",
                self.state
            )))
        }
    }

    fn send(&mut self, command: Command) {
        if self.state == State::Closed {
            return;
        }
        if self.config.debug {
            tracing::debug!(
                target: TRANSCRIPT_TARGET,
                instance = self.config.instance_id.as_deref().unwrap_or_default(),
                "C: {}",
                command.redacted()
            );
        }
        self.outbound.push_back(Transmit::new(command.serialize()));
    }

    fn trace_server(&self, reply: &Reply) {
        if self.config.debug {
            tracing::debug!(
                target: TRANSCRIPT_TARGET,
                instance = self.config.instance_id.as_deref().unwrap_or_default(),
                "S: {}",
                reply.text.replace("\r\n", "\n   ")
            );
        }
    }

    fn send_ehlo(&mut self) {
        let hostname = self.config.client_name.clone();
        self.send(Command::Ehlo { hostname });
        self.state = State::Ehlo;
    }

    fn send_helo(&mut self) {
        let hostname = self.config.client_name.clone();
        self.send(Command::Helo { hostname });
        self.state = State::Helo;
    }

    fn become_idle(&mut self) {
        self.auth = None;
        self.state = State::Idle;
        self.events.push_back(Event::Idle);
    }

    fn on_greeting(&mut self, reply: &Reply) -> Result<()> {
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(unexpected(Stage::Greeting, reply));
        }
        self.send_ehlo();
        Ok(())
    }

    fn on_ehlo(&mut self, reply: &Reply) -> Result<()> {
        if !reply.is_success() {
            self.send_helo();
            return Ok(());
        }

        self.capabilities = Capabilities::parse(&reply.text);
        if self.capabilities.starttls && self.config.starttls && !self.secure {
            self.send(Command::StartTls);
            self.state = State::StartTls;
            return Ok(());
        }

        self.authenticate()
    }

    fn on_helo(&mut self, reply: &Reply) -> Result<()> {
        if !reply.is_success() {
            return Err(unexpected(Stage::Helo, reply));
        }
        self.authenticate()
    }

    fn on_starttls(&mut self, reply: &Reply) -> Result<()> {
        if !reply.is_success() {
            tracing::warn!(code = %reply.code, "STARTTLS refused, continuing without TLS");
            self.send_helo();
            return Ok(());
        }
        self.state = State::TlsHandshake;
        self.events.push_back(Event::StartTls);
        Ok(())
    }

    fn authenticate(&mut self) -> Result<()> {
        let Some(settings) = self.config.auth.as_ref() else {
            self.become_idle();
            return Ok(());
        };

        let mechanism = select_mechanism(settings, &self.capabilities)?;
        tracing::debug!(%mechanism, "authenticating");
        let plain = match mechanism {
            AuthMechanism::Plain => {
                let (user, pass) = settings.credentials()?;
                Some(postwire_oauth::sasl::plain_response(user, pass))
            }
            _ => None,
        };

        self.auth = Some(AuthContext::new(mechanism));
        match mechanism {
            AuthMechanism::Plain => {
                self.send(Command::Auth {
                    mechanism,
                    initial_response: plain,
                });
                self.state = State::AuthComplete;
            }
            AuthMechanism::Login => {
                self.send(Command::Auth {
                    mechanism,
                    initial_response: None,
                });
                self.state = State::AuthLoginUser;
            }
            AuthMechanism::XOAuth | AuthMechanism::XOAuth2 => {
                self.state = State::AuthToken(mechanism);
                self.events.push_back(Event::TokenRequired {
                    mechanism,
                    refresh: false,
                });
            }
        }
        Ok(())
    }

    fn on_login_challenge(&mut self, reply: &Reply, password: bool) -> Result<()> {
        let expected = if password {
            LOGIN_PASS_CHALLENGE
        } else {
            LOGIN_USER_CHALLENGE
        };
        if reply.text != expected {
            return Err(unexpected(Stage::AuthLogin, reply));
        }

        let response = {
            let settings = self
                .config
                .auth
                .as_ref()
                .ok_or_else(|| Error::Protocol("no credentials for AUTH LOGIN".into()))?;
            let (user, pass) = settings.credentials()?;
            auth::encode(if password { pass } else { user })
        };

        self.send(Command::AuthResponse(response));
        self.state = if password {
            State::AuthComplete
        } else {
            State::AuthLoginPass
        };
        Ok(())
    }

    fn on_auth_complete(&mut self, reply: &Reply) -> Result<()> {
        if reply.code == ReplyCode::AUTH_CONTINUE
            && let Some(ctx) = self.auth.as_mut()
            && ctx.mechanism == AuthMechanism::XOAuth2
            && let Some(status) = auth::xoauth2_error_status(reply)
        {
            if ctx.may_refresh(&status) {
                ctx.retries += 1;
                tracing::debug!(status, attempt = ctx.retries, "XOAUTH2 token refused, refreshing");
                self.state = State::XOAuth2Retry;
            } else {
                ctx.retries = 0;
            }
            // Acknowledge the error challenge; the server then sends its verdict
            self.send(Command::AuthResponse(String::new()));
            return Ok(());
        }

        if !reply.is_success() {
            return Err(Error::Auth {
                code: reply.code.as_u16(),
                message: reply.text.clone(),
            });
        }

        self.become_idle();
        Ok(())
    }

    fn on_idle(&mut self, reply: &Reply) -> Result<()> {
        if reply.code.class() >= 4 {
            return Err(unexpected(Stage::Idle, reply));
        }
        Ok(())
    }

    fn on_mail_from(&mut self, reply: &Reply) -> Result<()> {
        if !reply.is_success() {
            return Err(Error::Sender {
                code: reply.code.as_u16(),
                message: reply.text.clone(),
            });
        }
        self.next_recipient();
        Ok(())
    }

    fn next_recipient(&mut self) -> bool {
        let next = self.transaction.as_mut().and_then(|tx| {
            let next = tx.queue.pop_front()?;
            tx.current = Some(next.clone());
            Some(next)
        });

        match next {
            Some(to) => {
                self.send(Command::RcptTo { to });
                self.state = State::RcptTo;
                true
            }
            None => false,
        }
    }

    fn on_rcpt_to(&mut self, reply: &Reply) -> Result<()> {
        if reply.code == ReplyCode::SERVICE_UNAVAILABLE {
            return Err(unexpected(Stage::RcptTo, reply));
        }

        {
            let tx = self
                .transaction
                .as_mut()
                .ok_or_else(|| Error::Protocol("RCPT TO reply without a transaction".into()))?;
            let current = tx.current.take();
            if reply.is_success() {
                tx.accepted += 1;
            } else if let Some(addr) = current {
                tracing::info!(recipient = %addr, code = %reply.code, "recipient rejected");
                tx.rejected.push(addr.into_string());
            }
        }

        if self.next_recipient() {
            return Ok(());
        }

        let Some(tx) = self.transaction.take() else {
            return Err(Error::Protocol("RCPT TO reply without a transaction".into()));
        };
        if tx.accepted == 0 {
            return Err(Error::Recipients {
                rejected: tx.rejected,
                code: reply.code.as_u16(),
                message: reply.text.clone(),
            });
        }

        self.rejected.clone_from(&tx.rejected);
        self.events.push_back(Event::RecipientsRejected(tx.rejected));
        self.send(Command::Data);
        self.state = State::Data;
        Ok(())
    }

    fn on_data(&mut self, reply: &Reply) -> Result<()> {
        if !(reply.is_success() || reply.is_intermediate()) {
            return Err(unexpected(Stage::Data, reply));
        }
        self.data_mode = true;
        self.last_bytes = [0; 2];
        self.state = State::Streaming;
        self.events.push_back(Event::ReadyForData);
        Ok(())
    }

    fn on_data_end(&mut self, reply: Reply) -> Result<()> {
        let delivery = Delivery {
            code: reply.code,
            response: reply.text,
            rejected: std::mem::take(&mut self.rejected),
        };
        self.state = State::Idle;
        self.events.push_back(Event::Finished(delivery));
        Ok(())
    }
}

fn unexpected(stage: Stage, reply: &Reply) -> Error {
    Error::UnexpectedReply {
        stage,
        code: reply.code.as_u16(),
        message: reply.text.clone(),
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
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            client_name: "client.test".into(),
            starttls: true,
            ..ProtocolConfig::default()
        }
    }

    fn reply(text: &str) -> Reply {
        let mut framer = crate::parser::ReplyFramer::new();
        framer.push(format!("{text}\r\n").as_bytes()).unwrap().unwrap()
    }

    fn sent(protocol: &mut Protocol) -> Vec<String> {
        std::iter::from_fn(|| protocol.poll_transmit())
            .map(|t| String::from_utf8(t.data).unwrap())
            .collect()
    }

    fn events(protocol: &mut Protocol) -> Vec<Event> {
        std::iter::from_fn(|| protocol.poll_event()).collect()
    }

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    /// Runs greeting + EHLO without STARTTLS or auth.
    fn idle_protocol() -> Protocol {
        let mut p = Protocol::new(config());
        p.connected().unwrap();
        p.handle_reply(reply("220 mx ready")).unwrap();
        p.handle_reply(reply("250-mx\r\n250 SIZE 1000")).unwrap();
        sent(&mut p);
        assert_eq!(events(&mut p), vec![Event::Idle]);
        p
    }

    mod handshake_tests {
        use super::*;

        #[test]
        fn greeting_must_be_220() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            let err = p.handle_reply(reply("554 go away")).unwrap_err();
            assert!(matches!(
                err,
                Error::UnexpectedReply {
                    stage: Stage::Greeting,
                    code: 554,
                    ..
                }
            ));
            assert!(sent(&mut p).is_empty());
            assert_eq!(p.state(), State::Closed);
        }

        #[test]
        fn greeting_sends_ehlo() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n"]);
            assert_eq!(p.state(), State::Ehlo);
        }

        #[test]
        fn no_starttls_when_not_advertised() {
            let p = idle_protocol();
            assert_eq!(p.state(), State::Idle);
            assert!(!p.is_secure());
        }

        #[test]
        fn ehlo_failure_falls_back_to_helo() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            sent(&mut p);
            p.handle_reply(reply("502 no EHLO")).unwrap();
            assert_eq!(sent(&mut p), vec!["HELO client.test\r\n"]);
            p.handle_reply(reply("250 hi")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        #[test]
        fn helo_failure_is_fatal() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply("502 no EHLO")).unwrap();
            sent(&mut p);
            let err = p.handle_reply(reply("502 no HELO either")).unwrap_err();
            assert!(matches!(err, Error::UnexpectedReply { stage: Stage::Helo, .. }));
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn starttls_upgrade_then_ehlo_again() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply("250-mx\r\n250 STARTTLS")).unwrap();
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n", "STARTTLS\r\n"]);

            p.handle_reply(reply("220 go ahead")).unwrap();
            assert_eq!(events(&mut p), vec![Event::StartTls]);
            assert_eq!(p.state(), State::TlsHandshake);

            p.tls_established().unwrap();
            assert!(p.is_secure());
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n"]);

            // Advertised again over TLS; must not loop
            p.handle_reply(reply("250-mx\r\n250 STARTTLS")).unwrap();
            assert!(sent(&mut p).is_empty());
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        #[test]
        fn starttls_disabled() {
            let mut p = Protocol::new(ProtocolConfig {
                starttls: false,
                ..config()
            });
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply("250-mx\r\n250 STARTTLS")).unwrap();
            assert_eq!(sent(&mut p), vec!["EHLO client.test\r\n"]);
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        #[test]
        fn starttls_refused_falls_back_to_helo() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply("250-mx\r\n250 STARTTLS")).unwrap();
            sent(&mut p);
            p.handle_reply(reply("454 TLS not available")).unwrap();
            assert_eq!(sent(&mut p), vec!["HELO client.test\r\n"]);
            assert_eq!(p.state(), State::Helo);
        }

        #[test]
        fn reply_during_tls_handshake_is_fatal() {
            let mut p = Protocol::new(config());
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply("250-mx\r\n250 STARTTLS")).unwrap();
            p.handle_reply(reply("220 go ahead")).unwrap();
            assert!(p.handle_reply(reply("250 what")).is_err());
            assert_eq!(p.state(), State::Closed);
        }
    }

    mod auth_tests {
        use super::*;

        fn with_auth(auth: AuthSettings, ehlo: &str) -> Protocol {
            let mut p = Protocol::new(ProtocolConfig {
                auth: Some(auth),
                ..config()
            });
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            p.handle_reply(reply(ehlo)).unwrap();
            p
        }

        #[test]
        fn plain() {
            let mut p = with_auth(AuthSettings::login("user", "pass"), "250-mx\r\n250 AUTH PLAIN");
            assert_eq!(
                sent(&mut p),
                vec!["EHLO client.test\r\n", "AUTH PLAIN AHVzZXIAcGFzcw==\r\n"]
            );
            p.handle_reply(reply("235 ok")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Idle]);
            assert!(p.auth_context().is_none());
        }

        #[test]
        fn plain_rejected() {
            let mut p = with_auth(AuthSettings::login("user", "bad"), "250 AUTH PLAIN");
            let err = p.handle_reply(reply("535 5.7.8 bad credentials")).unwrap_err();
            assert!(matches!(err, Error::Auth { code: 535, .. }));
            assert_eq!(p.state(), State::Closed);
        }

        #[test]
        fn login_exchange() {
            let mut p = with_auth(AuthSettings::login("user", "pass"), "250 AUTH LOGIN PLAIN");
            sent(&mut p);
            assert_eq!(p.state(), State::AuthLoginUser);

            p.handle_reply(reply(LOGIN_USER_CHALLENGE)).unwrap();
            assert_eq!(sent(&mut p), vec![format!("{}\r\n", STANDARD.encode("user"))]);

            p.handle_reply(reply(LOGIN_PASS_CHALLENGE)).unwrap();
            assert_eq!(sent(&mut p), vec![format!("{}\r\n", STANDARD.encode("pass"))]);

            p.handle_reply(reply("235 welcome")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        #[test]
        fn login_wrong_challenge() {
            let mut p = with_auth(AuthSettings::login("user", "pass"), "250 AUTH LOGIN");
            let err = p.handle_reply(reply("334 d2hhdD8=")).unwrap_err();
            assert!(matches!(err, Error::UnexpectedReply { stage: Stage::AuthLogin, .. }));
        }

        #[test]
        fn no_credentials_skips_auth() {
            let p = idle_protocol();
            assert_eq!(p.state(), State::Idle);
        }

        #[test]
        fn unknown_method() {
            let mut p = Protocol::new(ProtocolConfig {
                auth: Some(AuthSettings {
                    method: Some("NTLM".into()),
                    ..AuthSettings::login("u", "p")
                }),
                ..config()
            });
            p.connected().unwrap();
            p.handle_reply(reply("220 mx")).unwrap();
            let err = p.handle_reply(reply("250 AUTH PLAIN")).unwrap_err();
            assert!(matches!(err, Error::Protocol(_)));
        }

        #[test]
        fn xoauth_static_token() {
            let mut p = with_auth(
                AuthSettings {
                    xoauth: true,
                    ..AuthSettings::default()
                },
                "250 AUTH XOAUTH",
            );
            assert_eq!(
                events(&mut p),
                vec![Event::TokenRequired {
                    mechanism: AuthMechanism::XOAuth,
                    refresh: false
                }]
            );
            sent(&mut p);
            p.provide_token("dG9rZW4=".into()).unwrap();
            assert_eq!(sent(&mut p), vec!["AUTH XOAUTH dG9rZW4=\r\n"]);
            p.handle_reply(reply("235 ok")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        fn xoauth2_error(status: &str) -> String {
            let json = format!(r#"{{"status":"{status}","schemes":"Bearer","scope":"https://mail.google.com/"}}"#);
            format!("334 {}", STANDARD.encode(json))
        }

        #[test]
        fn xoauth2_refresh_and_retry() {
            let mut p = with_auth(
                AuthSettings {
                    xoauth2: true,
                    ..AuthSettings::default()
                },
                "250 AUTH XOAUTH2",
            );
            events(&mut p);
            sent(&mut p);
            p.provide_token("b2xk".into()).unwrap();
            assert_eq!(sent(&mut p), vec!["AUTH XOAUTH2 b2xk\r\n"]);

            p.handle_reply(reply(&xoauth2_error("401"))).unwrap();
            assert_eq!(sent(&mut p), vec!["\r\n"]);
            assert_eq!(p.state(), State::XOAuth2Retry);

            p.handle_reply(reply("535 5.7.8 Username and Password not accepted")).unwrap();
            assert_eq!(
                events(&mut p),
                vec![Event::TokenRequired {
                    mechanism: AuthMechanism::XOAuth2,
                    refresh: true
                }]
            );

            p.provide_token("bmV3".into()).unwrap();
            assert_eq!(sent(&mut p), vec!["AUTH XOAUTH2 bmV3\r\n"]);
            p.handle_reply(reply("235 2.7.0 Accepted")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Idle]);
        }

        #[test]
        fn xoauth2_non_retryable_status_fails() {
            let mut p = with_auth(
                AuthSettings {
                    xoauth2: true,
                    ..AuthSettings::default()
                },
                "250 AUTH XOAUTH2",
            );
            p.provide_token("dG9r".into()).unwrap();
            p.handle_reply(reply(&xoauth2_error("403"))).unwrap();
            assert_eq!(p.state(), State::AuthComplete);
            sent(&mut p);
            let err = p.handle_reply(reply("535 denied")).unwrap_err();
            assert!(matches!(err, Error::Auth { code: 535, .. }));
        }

        #[test]
        fn xoauth2_retries_are_capped() {
            let mut p = with_auth(
                AuthSettings {
                    xoauth2: true,
                    ..AuthSettings::default()
                },
                "250 AUTH XOAUTH2",
            );
            p.provide_token("dG9r".into()).unwrap();
            for _ in 0..MAX_XOAUTH2_RETRIES {
                p.handle_reply(reply(&xoauth2_error("401"))).unwrap();
                assert_eq!(p.state(), State::XOAuth2Retry);
                p.handle_reply(reply("535 no")).unwrap();
                p.provide_token("dG9r".into()).unwrap();
            }
            p.handle_reply(reply(&xoauth2_error("401"))).unwrap();
            assert_eq!(p.state(), State::AuthComplete);
            assert!(p.handle_reply(reply("535 no")).is_err());
        }

        #[test]
        fn provide_token_out_of_turn() {
            let mut p = idle_protocol();
            assert!(p.provide_token("x".into()).is_err());
        }
    }

    mod transaction_tests {
        use super::*;

        fn envelope(to: &[&str]) -> Envelope {
            Envelope::new(Some(addr("a@b.com")), to.iter().map(|s| addr(s)).collect())
        }

        #[test]
        fn partial_rejection_still_sends_data() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com", "b@x.com", "c@x.com"])).unwrap();
            assert_eq!(sent(&mut p), vec!["MAIL FROM:<a@b.com>\r\n"]);

            p.handle_reply(reply("250 sender ok")).unwrap();
            assert_eq!(sent(&mut p), vec!["RCPT TO:<a@x.com>\r\n"]);
            p.handle_reply(reply("250 ok")).unwrap();
            assert_eq!(sent(&mut p), vec!["RCPT TO:<b@x.com>\r\n"]);
            p.handle_reply(reply("550 no such user")).unwrap();
            assert_eq!(sent(&mut p), vec!["RCPT TO:<c@x.com>\r\n"]);
            p.handle_reply(reply("250 ok")).unwrap();
            assert_eq!(sent(&mut p), vec!["DATA\r\n"]);
            assert_eq!(
                events(&mut p),
                vec![Event::RecipientsRejected(vec!["b@x.com".into()])]
            );

            p.handle_reply(reply("354 go")).unwrap();
            assert_eq!(events(&mut p), vec![Event::ReadyForData]);
            assert!(p.is_data_mode());

            assert!(p.write(b"Subject: x\r\n\r\nhello\r\n"));
            p.end().unwrap();
            assert_eq!(
                sent(&mut p),
                vec!["Subject: x\r\n\r\nhello\r\n", ".\r\n"]
            );

            p.handle_reply(reply("250 2.0.0 queued as 1234")).unwrap();
            let Some(Event::Finished(delivery)) = p.poll_event() else {
                panic!("expected Finished");
            };
            assert!(delivery.is_success());
            assert_eq!(delivery.response, "250 2.0.0 queued as 1234");
            assert_eq!(delivery.rejected, vec!["b@x.com".to_string()]);
            assert_eq!(p.state(), State::Idle);
        }

        #[test]
        fn all_recipients_rejected() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com"])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            sent(&mut p);
            let err = p.handle_reply(reply("550 unknown")).unwrap_err();
            let Error::Recipients { rejected, code, .. } = err else {
                panic!("expected Recipients");
            };
            assert_eq!(rejected, vec!["a@x.com".to_string()]);
            assert_eq!(code, 550);
            assert!(sent(&mut p).is_empty());
            assert_eq!(p.state(), State::Closed);
        }

        #[test]
        fn rcpt_421_is_fatal() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com", "b@x.com"])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            sent(&mut p);
            let err = p.handle_reply(reply("421 closing")).unwrap_err();
            assert!(matches!(err, Error::UnexpectedReply { stage: Stage::RcptTo, code: 421, .. }));
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn sender_rejected() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com"])).unwrap();
            let err = p.handle_reply(reply("553 bad sender")).unwrap_err();
            assert!(matches!(err, Error::Sender { code: 553, .. }));
        }

        #[test]
        fn data_accepts_250() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com"])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            events(&mut p);
            p.handle_reply(reply("250 send it")).unwrap();
            assert_eq!(events(&mut p), vec![Event::ReadyForData]);
        }

        #[test]
        fn data_refused() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com"])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            let err = p.handle_reply(reply("554 no data for you")).unwrap_err();
            assert!(matches!(err, Error::UnexpectedReply { stage: Stage::Data, .. }));
        }

        #[test]
        fn empty_recipients_is_validation_error() {
            let mut p = idle_protocol();
            let err = p.use_envelope(envelope(&[])).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
            assert_eq!(p.state(), State::Idle);
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn anonymous_sender() {
            let mut p = idle_protocol();
            p.use_envelope(Envelope::new(None, vec![addr("a@x.com")])).unwrap();
            assert_eq!(sent(&mut p), vec!["MAIL FROM:<anonymous@client.test>\r\n"]);
        }

        #[test]
        fn envelope_requires_idle() {
            let mut p = Protocol::new(config());
            assert!(matches!(
                p.use_envelope(envelope(&["a@x.com"])),
                Err(Error::Protocol(_))
            ));
        }

        #[test]
        fn rejected_final_status_returns_to_idle() {
            let mut p = idle_protocol();
            p.use_envelope(envelope(&["a@x.com"])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("354 go")).unwrap();
            events(&mut p);
            p.end().unwrap();
            p.handle_reply(reply("554 spam")).unwrap();
            let Some(Event::Finished(delivery)) = p.poll_event() else {
                panic!("expected Finished");
            };
            assert!(!delivery.is_success());
            assert_eq!(p.state(), State::Idle);
        }
    }

    mod data_tests {
        use super::*;

        fn streaming() -> Protocol {
            let mut p = idle_protocol();
            p.use_envelope(Envelope::new(None, vec![addr("a@x.com")])).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("250 ok")).unwrap();
            p.handle_reply(reply("354 go")).unwrap();
            sent(&mut p);
            events(&mut p);
            p
        }

        fn terminator(chunks: &[&[u8]]) -> String {
            let mut p = streaming();
            for chunk in chunks {
                p.write(chunk);
            }
            p.end().unwrap();
            sent(&mut p).pop().unwrap()
        }

        #[test]
        fn crlf_ending() {
            assert_eq!(terminator(&[b"body\r\n"]), ".\r\n");
        }

        #[test]
        fn cr_ending() {
            assert_eq!(terminator(&[b"body\r"]), "\n.\r\n");
        }

        #[test]
        fn bare_ending() {
            assert_eq!(terminator(&[b"body"]), "\r\n.\r\n");
            assert_eq!(terminator(&[]), "\r\n.\r\n");
        }

        #[test]
        fn two_byte_chunk_is_tracked() {
            assert_eq!(terminator(&[b"body", b"\r\n"]), ".\r\n");
        }

        #[test]
        fn single_byte_chunks() {
            assert_eq!(terminator(&[b"body", b"\r", b"\n"]), ".\r\n");
            assert_eq!(terminator(&[b"body\r\n", b"x"]), "\r\n.\r\n");
        }

        #[test]
        fn write_outside_data_mode_is_noop() {
            let mut p = idle_protocol();
            assert!(!p.write(b"ignored"));
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn end_outside_data_mode_fails() {
            let mut p = idle_protocol();
            assert!(p.end().is_err());
        }

        #[test]
        fn reply_while_streaming_is_fatal() {
            let mut p = streaming();
            assert!(p.handle_reply(reply("421 timeout")).is_err());
            assert!(!p.write(b"late"));
        }
    }

    mod idle_tests {
        use super::*;

        #[test]
        fn error_reply_while_idle_is_fatal() {
            let mut p = idle_protocol();
            let err = p.handle_reply(reply("421 idle timeout")).unwrap_err();
            assert!(matches!(err, Error::UnexpectedReply { stage: Stage::Idle, .. }));
            assert_eq!(p.state(), State::Closed);
        }

        #[test]
        fn informational_reply_while_idle_is_ignored() {
            let mut p = idle_protocol();
            p.handle_reply(reply("250 whatever")).unwrap();
            assert_eq!(p.state(), State::Idle);
        }

        #[test]
        fn quit_then_close() {
            let mut p = idle_protocol();
            p.quit();
            assert_eq!(sent(&mut p), vec!["QUIT\r\n"]);
            p.handle_reply(reply("221 bye")).unwrap();
            assert_eq!(events(&mut p), vec![Event::Closed]);
            assert_eq!(p.state(), State::Closed);

            p.quit();
            assert!(sent(&mut p).is_empty());
        }

        #[test]
        fn close_is_idempotent() {
            let mut p = idle_protocol();
            p.close();
            p.close();
            assert_eq!(p.state(), State::Closed);
            p.handle_reply(reply("250 late")).unwrap();
        }
    }
}

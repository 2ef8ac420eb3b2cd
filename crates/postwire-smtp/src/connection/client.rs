//! Async driver around the sans-I/O protocol.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::rustls::ClientConfig;

use super::config::{Auth, Config, Security, TokenSource};
use super::stream::{SmtpStream, Transport, connect, connect_tls, create_tls_connector};
use crate::error::{Error, Result, TimeoutKind};
use crate::parser::ReplyFramer;
use crate::protocol::{Delivery, Envelope, Event, Protocol, State};
use crate::types::{AuthMechanism, Capabilities, Reply};

/// How long QUIT waits for the server's 221.
const QUIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial read buffer size.
const READ_BUFFER_SIZE: usize = 8192;

/// An SMTP session over one transport.
///
/// [`Connection::open`] connects and runs the whole handshake (greeting,
/// EHLO/HELO, STARTTLS, AUTH); the connection is then idle and can run any
/// number of transactions until [`Connection::quit`] or [`Connection::close`].
///
/// Any transport failure or fatal reply closes the connection. Later calls
/// return [`Error::Closed`], except [`Connection::write`] which silently
/// drops its bytes.
pub struct Connection {
    stream: SmtpStream,
    framer: ReplyFramer,
    protocol: Protocol,
    host: String,
    tls_config: Option<Arc<ClientConfig>>,
    auth: Option<Auth>,
    read_buf: BytesMut,
}

impl Connection {
    /// Connects to `config.host` and runs the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] or [`Error::Timeout`] if the server cannot be
    /// reached, or the error that ended the handshake.
    pub async fn open(config: &Config) -> Result<Self> {
        let connecting = async {
            match config.security {
                Security::Implicit => {
                    let tls = create_tls_connector(config.tls.clone())?;
                    connect_tls(&config.host, config.port, &tls).await
                }
                Security::None | Security::StartTls => connect(&config.host, config.port).await,
            }
        };
        let stream = match config.connection_timeout {
            Some(after) => tokio::time::timeout(after, connecting)
                .await
                .map_err(|_| Error::Timeout {
                    kind: TimeoutKind::Connection,
                    after,
                })??,
            None => connecting.await?,
        };

        Self::start(stream, config).await
    }

    /// Runs the handshake over an already connected transport.
    ///
    /// The transport is used as is. With [`Security::Implicit`] it is assumed
    /// to be encrypted already; STARTTLS still upgrades it when negotiated.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the handshake.
    pub async fn handshake<T: Transport + 'static>(transport: T, config: &Config) -> Result<Self> {
        Self::start(SmtpStream::plain(transport), config).await
    }

    async fn start(stream: SmtpStream, config: &Config) -> Result<Self> {
        let mut conn = Self {
            stream,
            framer: ReplyFramer::new(),
            protocol: Protocol::new(config.protocol_config()),
            host: config.host.clone(),
            tls_config: config.tls.clone(),
            auth: config.auth.clone(),
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        };
        conn.protocol.connected()?;

        let after = config.greeting_timeout;
        let greeting = match tokio::time::timeout(after, conn.read_reply()).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(err)) => {
                conn.close().await;
                return Err(err);
            }
            Err(_) => {
                tracing::debug!(host = %conn.host, ?after, "no greeting");
                conn.close().await;
                return Err(Error::Timeout {
                    kind: TimeoutKind::Greeting,
                    after,
                });
            }
        };
        if let Err(err) = conn.protocol.handle_reply(greeting) {
            conn.close().await;
            return Err(err);
        }

        match conn.next_event().await? {
            Event::Idle => {
                tracing::debug!(
                    host = %conn.host,
                    secure = conn.is_secure(),
                    "session ready"
                );
                Ok(conn)
            }
            other => Err(conn.unexpected(&other).await),
        }
    }

    /// Returns the protocol state.
    #[must_use]
    pub fn state(&self) -> State {
        self.protocol.state()
    }

    /// Returns true once the session runs over TLS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol.is_secure()
    }

    /// Returns the capabilities from the latest EHLO.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        self.protocol.capabilities()
    }

    /// Returns true once the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.protocol.state() == State::Closed || self.stream.is_closed()
    }

    /// Sends MAIL FROM and one RCPT TO per recipient, then DATA.
    ///
    /// Returns the recipients the server refused. On success the connection
    /// is in data mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an envelope without recipients (the
    /// connection stays usable), [`Error::Sender`] or [`Error::Recipients`]
    /// when the server refuses the envelope, or any transport error.
    pub async fn use_envelope(&mut self, envelope: Envelope) -> Result<Vec<String>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        if let Err(err) = self.drain_unsolicited().await {
            self.close().await;
            return Err(err);
        }
        self.protocol.use_envelope(envelope)?;

        let mut rejected = Vec::new();
        loop {
            match self.next_event().await? {
                Event::RecipientsRejected(list) => rejected = list,
                Event::ReadyForData => return Ok(rejected),
                other => return Err(self.unexpected(&other).await),
            }
        }
    }

    /// Writes message bytes verbatim.
    ///
    /// Outside data mode, including after the connection closed, the bytes
    /// are dropped without error.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the write fails; the connection is closed.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if !self.protocol.write(chunk) {
            return Ok(());
        }
        if let Err(err) = self.flush().await {
            self.close().await;
            return Err(err);
        }
        Ok(())
    }

    /// Terminates the message and waits for the final status.
    ///
    /// A non-2xx status is returned as a [`Delivery`], not an error, and the
    /// connection stays open for the next transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the connection is closed, or a protocol
    /// error outside data mode.
    pub async fn end(&mut self) -> Result<Delivery> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.protocol.end()?;

        match self.next_event().await? {
            Event::Finished(delivery) => {
                tracing::debug!(code = %delivery.code, "message finished");
                Ok(delivery)
            }
            other => Err(self.unexpected(&other).await),
        }
    }

    /// Runs one transaction: envelope, body, end of data.
    ///
    /// # Errors
    ///
    /// See [`Connection::use_envelope`] and [`Connection::end`].
    pub async fn send_message(&mut self, envelope: Envelope, message: &[u8]) -> Result<Delivery> {
        self.use_envelope(envelope).await?;
        self.write(message).await?;
        self.end().await
    }

    /// Sends QUIT, waits briefly for the reply, then closes.
    pub async fn quit(&mut self) {
        if self.is_closed() {
            return;
        }
        self.protocol.quit();
        match tokio::time::timeout(QUIT_TIMEOUT, self.drive()).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::debug!(error = %err, "QUIT failed"),
            Err(_) => tracing::debug!("QUIT timed out"),
        }
        self.close().await;
    }

    /// Closes the connection without QUIT. Idempotent.
    pub async fn close(&mut self) {
        self.protocol.close();
        self.framer.reset();

        let mut stream = std::mem::replace(&mut self.stream, SmtpStream::Closed);
        if stream.is_closed() {
            return;
        }
        if let Err(err) = stream.shutdown().await {
            tracing::trace!(error = %err, "shutdown failed");
        }
        tracing::debug!(host = %self.host, "connection closed");
    }

    /// Drives the protocol to its next event, closing the connection on error.
    async fn next_event(&mut self) -> Result<Event> {
        match self.drive().await {
            Ok(event) => Ok(event),
            Err(err) => {
                self.close().await;
                Err(err)
            }
        }
    }

    async fn drive(&mut self) -> Result<Event> {
        loop {
            self.flush().await?;

            match self.protocol.poll_event() {
                Some(Event::StartTls) => {
                    self.framer.reset();
                    let connector = create_tls_connector(self.tls_config.clone())?;
                    self.stream.upgrade_to_tls(&connector, &self.host).await?;
                    tracing::debug!(host = %self.host, "TLS established");
                    self.protocol.tls_established()?;
                }
                Some(Event::TokenRequired { mechanism, refresh }) => {
                    let source = self.token_source(mechanism)?;
                    let token = source.token(refresh).await?;
                    self.protocol.provide_token(token)?;
                }
                Some(event) => return Ok(event),
                None => {
                    if self.protocol.state() == State::Closed {
                        return Err(Error::Closed);
                    }
                    let reply = self.read_reply().await?;
                    self.protocol.handle_reply(reply)?;
                }
            }
        }
    }

    /// Consumes replies already received while no command was outstanding.
    async fn drain_unsolicited(&mut self) -> Result<()> {
        while let Ok(reply) = tokio::time::timeout(Duration::ZERO, self.read_reply()).await {
            let reply = reply?;
            tracing::debug!(reply = %reply.text, "unsolicited reply while idle");
            self.protocol.handle_reply(reply)?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let mut wrote = false;
        while let Some(transmit) = self.protocol.poll_transmit() {
            self.stream.write_all(&transmit.data).await?;
            wrote = true;
        }
        if wrote {
            self.stream.flush().await?;
        }
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            self.read_buf.clear();
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::Transport(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
            if let Some(reply) = self.framer.push(&self.read_buf)? {
                return Ok(reply);
            }
        }
    }

    fn token_source(&self, mechanism: AuthMechanism) -> Result<Arc<dyn TokenSource>> {
        let source = self.auth.as_ref().and_then(|auth| match mechanism {
            AuthMechanism::XOAuth => auth.xoauth.clone(),
            AuthMechanism::XOAuth2 => auth.xoauth2.clone(),
            AuthMechanism::Plain | AuthMechanism::Login => None,
        });
        source.ok_or_else(|| Error::Protocol(format!("no token source for {mechanism}")))
    }

    async fn unexpected(&mut self, event: &Event) -> Error {
        self.close().await;
        Error::Protocol(format!("unexpected event {event:?} in state {:?}", self.state()))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("state", &self.protocol.state())
            .field("secure", &self.protocol.is_secure())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
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
    use crate::connection::config::StaticToken;
    use crate::error::Stage;
    use crate::types::Address;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;
    use tokio_test::io::Builder;

    enum Step {
        Send(&'static str),
        Expect(&'static str),
        Body,
        /// Wake the client.
        Signal(Arc<Notify>),
        /// Expect the client to hang up without another command.
        Eof,
    }

    use Step::{Body, Eof, Expect, Send, Signal};

    /// Plays a scripted server on one end of a duplex pipe; returns the body lines.
    fn serve(io: DuplexStream, steps: Vec<Step>) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(io);
            let mut reader = BufReader::new(reader);
            let mut body = Vec::new();
            for step in steps {
                match step {
                    Send(text) => writer.write_all(text.as_bytes()).await.unwrap(),
                    Expect(command) => {
                        let mut line = String::new();
                        reader.read_line(&mut line).await.unwrap();
                        assert_eq!(line, command);
                    }
                    Body => loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).await.unwrap();
                        if line == ".\r\n" {
                            break;
                        }
                        body.push(line);
                    },
                    Signal(notify) => notify.notify_one(),
                    Eof => {
                        let mut line = String::new();
                        let n = reader.read_line(&mut line).await.unwrap();
                        assert_eq!(n, 0, "unexpected command {line:?}");
                    }
                }
            }
            body
        })
    }

    fn config() -> Config {
        Config::builder("localhost")
            .client_name("client.test")
            .security(Security::None)
            .build()
    }

    fn handshake_steps() -> Vec<Step> {
        vec![
            Send("220 mx.test ESMTP\r\n"),
            Expect("EHLO client.test\r\n"),
            Send("250-mx.test\r\n250-SIZE 1000000\r\n250 8BITMIME\r\n"),
        ]
    }

    fn envelope(to: &[&str]) -> Envelope {
        Envelope::new(
            Some(Address::new("a@b.com").unwrap()),
            to.iter().map(|s| Address::new(*s).unwrap()).collect(),
        )
    }

    #[tokio::test]
    async fn test_handshake_and_send() {
        let (client, server) = tokio::io::duplex(4096);
        let mut steps = handshake_steps();
        steps.extend([
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("250 ok\r\n"),
            Expect("RCPT TO:<x@y.com>\r\n"),
            Send("250 ok\r\n"),
            Expect("DATA\r\n"),
            Send("354 go ahead\r\n"),
            Body,
            Send("250 2.0.0 queued\r\n"),
            Expect("QUIT\r\n"),
            Send("221 bye\r\n"),
        ]);
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        assert_eq!(conn.state(), State::Idle);
        assert!(!conn.is_secure());
        assert!(!conn.capabilities().starttls);

        let delivery = conn
            .send_message(envelope(&["x@y.com"]), b"Subject: hi\r\n\r\nhello\r\n")
            .await
            .unwrap();
        assert!(delivery.is_success());
        assert_eq!(delivery.response, "250 2.0.0 queued");
        assert!(delivery.rejected.is_empty());

        conn.quit().await;
        assert!(conn.is_closed());

        let body = server.await.unwrap();
        assert_eq!(body, vec!["Subject: hi\r\n", "\r\n", "hello\r\n"]);
    }

    #[tokio::test]
    async fn test_error_reply_while_idle_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let stray = Arc::new(Notify::new());
        let mut steps = handshake_steps();
        steps.extend([
            Send("421 4.4.2 idle too long\r\n"),
            Signal(stray.clone()),
            Eof,
        ]);
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        stray.notified().await;

        let err = conn.use_envelope(envelope(&["x@y.com"])).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedReply {
                stage: Stage::Idle,
                ..
            }
        ));
        assert!(conn.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_informational_reply_while_idle_is_skipped() {
        let (client, server) = tokio::io::duplex(4096);
        let stray = Arc::new(Notify::new());
        let mut steps = handshake_steps();
        steps.extend([
            Send("250 stray notice\r\n"),
            Signal(stray.clone()),
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("553 sender refused\r\n"),
            Eof,
        ]);
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        stray.notified().await;

        let err = conn.use_envelope(envelope(&["x@y.com"])).await.unwrap_err();
        assert!(matches!(err, Error::Sender { code: 553, .. }));
        assert!(conn.is_closed());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_two_transactions_on_one_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let mut steps = handshake_steps();
        for _ in 0..2 {
            steps.extend([
                Expect("MAIL FROM:<a@b.com>\r\n"),
                Send("250 ok\r\n"),
                Expect("RCPT TO:<x@y.com>\r\n"),
                Send("250 ok\r\n"),
                Expect("DATA\r\n"),
                Send("354 go ahead\r\n"),
                Body,
            ]);
        }
        steps.insert(steps.len() - 7, Send("554 rejected as spam\r\n"));
        steps.push(Send("250 ok\r\n"));
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        let first = conn.send_message(envelope(&["x@y.com"]), b"one").await.unwrap();
        assert!(!first.is_success());
        assert_eq!(first.code.as_u16(), 554);
        assert_eq!(conn.state(), State::Idle);

        let second = conn.send_message(envelope(&["x@y.com"]), b"two").await.unwrap();
        assert!(second.is_success());

        let body = server.await.unwrap();
        assert_eq!(body, vec!["one\r\n", "two\r\n"]);
    }

    #[tokio::test]
    async fn test_partial_rejection() {
        let (client, server) = tokio::io::duplex(4096);
        let mut steps = handshake_steps();
        steps.extend([
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("250 ok\r\n"),
            Expect("RCPT TO:<x@y.com>\r\n"),
            Send("550 no such user\r\n"),
            Expect("RCPT TO:<z@y.com>\r\n"),
            Send("250 ok\r\n"),
            Expect("DATA\r\n"),
            Send("354 go ahead\r\n"),
        ]);
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        let rejected = conn.use_envelope(envelope(&["x@y.com", "z@y.com"])).await.unwrap();
        assert_eq!(rejected, vec!["x@y.com".to_string()]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_all_recipients_rejected_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let mut steps = handshake_steps();
        steps.extend([
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("250 ok\r\n"),
            Expect("RCPT TO:<x@y.com>\r\n"),
            Send("550 no such user\r\n"),
        ]);
        let server = serve(server, steps);

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        let err = conn.use_envelope(envelope(&["x@y.com"])).await.unwrap_err();
        assert!(matches!(err, Error::Recipients { code: 550, .. }));
        assert!(conn.is_closed());

        conn.write(b"dropped").await.unwrap();
        assert!(matches!(conn.end().await, Err(Error::Closed)));
        assert!(matches!(
            conn.use_envelope(envelope(&["x@y.com"])).await,
            Err(Error::Closed)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_envelope_keeps_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(server, handshake_steps());

        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        let err = conn.use_envelope(envelope(&[])).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!conn.is_closed());
        assert_eq!(conn.state(), State::Idle);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_login_over_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(
            server,
            vec![
                Send("220 mx.test\r\n"),
                Expect("EHLO client.test\r\n"),
                Send("250-mx.test\r\n250 AUTH LOGIN\r\n"),
                Expect("AUTH LOGIN\r\n"),
                Send("334 VXNlcm5hbWU6\r\n"),
                Expect("dXNlcg==\r\n"),
                Send("334 UGFzc3dvcmQ6\r\n"),
                Expect("cGFzcw==\r\n"),
                Send("235 2.7.0 accepted\r\n"),
            ],
        );

        let config = Config::builder("localhost")
            .client_name("client.test")
            .security(Security::None)
            .auth(Auth::login("user", "pass"))
            .build();
        let conn = Connection::handshake(client, &config).await.unwrap();
        assert_eq!(conn.state(), State::Idle);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_xoauth2_token_source() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(
            server,
            vec![
                Send("220 mx.test\r\n"),
                Expect("EHLO client.test\r\n"),
                Send("250 AUTH XOAUTH2\r\n"),
                Expect("AUTH XOAUTH2 dG9rZW4=\r\n"),
                Send("235 ok\r\n"),
            ],
        );

        let config = Config::builder("localhost")
            .client_name("client.test")
            .security(Security::None)
            .auth(Auth::xoauth2(StaticToken::new("dG9rZW4=")))
            .build();
        Connection::handshake(client, &config).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_failure_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(
            server,
            vec![
                Send("220 mx.test\r\n"),
                Expect("EHLO client.test\r\n"),
                Send("250 AUTH PLAIN\r\n"),
                Expect("AUTH PLAIN AHVzZXIAYmFk\r\n"),
                Send("535 5.7.8 bad credentials\r\n"),
            ],
        );

        let config = Config::builder("localhost")
            .client_name("client.test")
            .security(Security::None)
            .auth(Auth::login("user", "bad"))
            .build();
        let err = Connection::handshake(client, &config).await.unwrap_err();
        assert!(matches!(err, Error::Auth { code: 535, .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_greeting() {
        let mock = Builder::new().read(b"554 no service\r\n").build();
        let err = Connection::handshake(mock, &config()).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { code: 554, .. }));
    }

    #[tokio::test]
    async fn test_multiline_greeting_in_pieces() {
        let mock = Builder::new()
            .read(b"220-mx.test\r\n")
            .read(b"220 ")
            .read(b"ready\r\n")
            .write(b"EHLO client.test\r\n")
            .read(b"250 mx.test\r\n")
            .build();
        let conn = Connection::handshake(mock, &config()).await.unwrap();
        assert_eq!(conn.state(), State::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let config = Config::builder("localhost")
            .security(Security::None)
            .greeting_timeout(Duration::from_millis(100))
            .build();
        let err = Connection::handshake(client, &config).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                kind: TimeoutKind::Greeting,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_server_hangup() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let err = Connection::handshake(client, &config()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_starttls_failure_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(
            server,
            vec![
                Send("220 mx.test\r\n"),
                Expect("EHLO client.test\r\n"),
                Send("250-mx.test\r\n250 STARTTLS\r\n"),
                Expect("STARTTLS\r\n"),
                Send("220 go ahead\r\n"),
                Send("this is not a TLS record\r\n"),
            ],
        );

        let config = Config::builder("localhost")
            .client_name("client.test")
            .build();
        assert!(Connection::handshake(client, &config).await.is_err());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = tokio::io::duplex(4096);
        let server = serve(server, handshake_steps());
        let mut conn = Connection::handshake(client, &config()).await.unwrap();
        conn.close().await;
        conn.close().await;
        conn.quit().await;
        assert!(conn.is_closed());
        server.await.unwrap();
    }
}

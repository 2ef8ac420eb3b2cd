//! Integration tests for the mailer.
//!
//! Each test runs a scripted SMTP server on a loopback port and drives it
//! through the public API.

#![allow(clippy::unwrap_used, clippy::too_many_lines)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use postwire_smtp::{
    Config, Connection, Envelope, Error, Mailer, Security, SendData, TimeoutKind,
};

/// One scripted server action.
#[derive(Clone)]
enum Step {
    /// Write a reply.
    Send(&'static str),
    /// Read one command line and compare it.
    Expect(&'static str),
    /// Read body lines up to the terminating dot.
    Body,
    /// Signal the first notify, then wait on the second.
    Hold(Arc<Notify>, Arc<Notify>),
    /// Never answer; drain until the client hangs up.
    Stall,
}

use Step::{Body, Expect, Hold, Send, Stall};

struct FakeServer {
    port: u16,
    task: JoinHandle<Vec<Vec<String>>>,
}

impl FakeServer {
    /// Accepts one connection per session, in order. Resolves to the body
    /// lines each session received.
    async fn start(sessions: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for steps in sessions {
                let (socket, _) = listener.accept().await.unwrap();
                bodies.push(run_session(socket, steps).await);
            }
            bodies
        });
        Self { port, task }
    }

    fn config(&self) -> postwire_smtp::ConfigBuilder {
        Config::builder("127.0.0.1")
            .port(self.port)
            .security(Security::None)
            .client_name("client.test")
    }

    async fn finish(self) -> Vec<Vec<String>> {
        self.task.await.unwrap()
    }
}

async fn run_session(socket: TcpStream, steps: Vec<Step>) -> Vec<String> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut body = Vec::new();

    for step in steps {
        match step {
            Send(reply) => writer.write_all(reply.as_bytes()).await.unwrap(),
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
            Hold(held, release) => {
                held.notify_one();
                release.notified().await;
            }
            Stall => {
                let mut line = String::new();
                while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                    line.clear();
                }
            }
        }
    }
    body
}

fn handshake() -> Vec<Step> {
    vec![
        Send("220 mx.test ESMTP ready\r\n"),
        Expect("EHLO client.test\r\n"),
        Send("250-mx.test greets client.test\r\n250 8BITMIME\r\n"),
    ]
}

fn transaction(final_reply: &'static str) -> Vec<Step> {
    vec![
        Expect("MAIL FROM:<a@b.com>\r\n"),
        Send("250 2.1.0 Ok\r\n"),
        Expect("RCPT TO:<c@d.com>\r\n"),
        Send("250 2.1.5 Ok\r\n"),
        Expect("RCPT TO:<e@f.com>\r\n"),
        Send("250 2.1.5 Ok\r\n"),
        Expect("DATA\r\n"),
        Send("354 End data with <CR><LF>.<CR><LF>\r\n"),
        Body,
        Send(final_reply),
    ]
}

fn quit() -> Vec<Step> {
    vec![Expect("QUIT\r\n"), Send("221 2.0.0 Bye\r\n")]
}

fn message() -> SendData {
    SendData::new()
        .from("Name <a@b.com>")
        .to("c@d.com")
        .to("e@f.com")
        .subject("S")
        .body("B")
}

#[tokio::test]
async fn test_send_end_to_end() {
    let session = [handshake(), transaction("250 2.0.0 Ok: queued as 4F2A\r\n"), quit()].concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(server.config().build());

    let outcome = mailer.send(&message()).await.unwrap();
    assert_eq!(outcome.response, "250 2.0.0 Ok: queued as 4F2A");
    assert!(outcome.rejected.is_empty());

    let bodies = server.finish().await;
    let body = bodies[0].concat();
    assert!(body.starts_with("From: Name <a@b.com>\r\nTo: c@d.com, e@f.com\r\nSubject: S\r\n"));
    assert!(body.ends_with("\r\n\r\nB\r\n"));
}

#[tokio::test]
async fn test_send_reports_partial_rejection() {
    let session = [
        handshake(),
        vec![
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("250 Ok\r\n"),
            Expect("RCPT TO:<c@d.com>\r\n"),
            Send("550 5.1.1 No such user\r\n"),
            Expect("RCPT TO:<e@f.com>\r\n"),
            Send("250 Ok\r\n"),
            Expect("DATA\r\n"),
            Send("354 go ahead\r\n"),
            Body,
            Send("250 Ok\r\n"),
        ],
        quit(),
    ]
    .concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(server.config().build());

    let outcome = mailer.send(&message()).await.unwrap();
    assert_eq!(outcome.rejected, vec!["c@d.com".to_string()]);
    assert!(!outcome.all_accepted());
    server.finish().await;
}

#[tokio::test]
async fn test_send_message_rejected() {
    let session = [handshake(), transaction("554 5.7.1 Spam detected\r\n"), quit()].concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(server.config().build());

    let err = mailer.send(&message()).await.unwrap_err();
    assert!(matches!(err, Error::MessageRejected { code: 554, .. }));
    assert!(err.is_permanent());
    server.finish().await;
}

#[tokio::test]
async fn test_send_timeout_destroys_connection() {
    let session = [handshake(), vec![Expect("MAIL FROM:<a@b.com>\r\n"), Stall]].concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(
        server
            .config()
            .send_timeout(Duration::from_millis(50))
            .build(),
    );

    let err = mailer.send(&message()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Timeout {
            kind: TimeoutKind::Send,
            after,
        } if after == Duration::from_millis(50)
    ));

    // The stalled session ends only once the client hung up
    server.finish().await;
}

#[tokio::test]
async fn test_writes_after_timeout_are_noops() {
    let session = [handshake(), vec![Expect("MAIL FROM:<a@b.com>\r\n"), Stall]].concat();
    let server = FakeServer::start(vec![session]).await;
    let config = server.config().build();

    let mut conn = Connection::open(&config).await.unwrap();
    let envelope = Envelope::new(
        Some(postwire_smtp::Address::new("a@b.com").unwrap()),
        vec![postwire_smtp::Address::new("c@d.com").unwrap()],
    );
    let pending =
        tokio::time::timeout(Duration::from_millis(50), conn.use_envelope(envelope)).await;
    assert!(pending.is_err());
    conn.close().await;

    conn.write(b"late bytes").await.unwrap();
    assert!(matches!(conn.end().await, Err(Error::Closed)));
    assert!(conn.is_closed());
    server.finish().await;
}

#[tokio::test]
async fn test_sequential_sends_share_one_connection() {
    let session = [
        handshake(),
        transaction("250 Ok: first\r\n"),
        transaction("550 5.7.1 Rejected\r\n"),
        transaction("250 Ok: third\r\n"),
        quit(),
    ]
    .concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(server.config().build());

    let first = mailer.send_seq(&message()).await.unwrap();
    assert_eq!(first.response, "250 Ok: first");

    let err = mailer.send_seq(&message()).await.unwrap_err();
    assert!(matches!(err, Error::MessageRejected { code: 550, .. }));

    let third = mailer.send_seq(&message()).await.unwrap();
    assert_eq!(third.response, "250 Ok: third");

    mailer.end_seq().await;
    let bodies = server.finish().await;
    assert_eq!(bodies.len(), 1);
}

#[tokio::test]
async fn test_sequential_send_rejects_overlap() {
    let held = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let session = [
        handshake(),
        vec![
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Hold(held.clone(), release.clone()),
            Send("250 Ok\r\n"),
            Expect("RCPT TO:<c@d.com>\r\n"),
            Send("250 Ok\r\n"),
            Expect("RCPT TO:<e@f.com>\r\n"),
            Send("250 Ok\r\n"),
            Expect("DATA\r\n"),
            Send("354 go ahead\r\n"),
            Body,
            Send("250 Ok: queued\r\n"),
        ],
        quit(),
    ]
    .concat();
    let server = FakeServer::start(vec![session]).await;
    let mailer = Mailer::new(server.config().build());
    let data = message();

    let (first, second) = tokio::join!(mailer.send_seq(&data), async {
        held.notified().await;
        let result = mailer.send_seq(&data).await;
        release.notify_one();
        result
    });

    assert!(matches!(second, Err(Error::Busy)));
    assert_eq!(first.unwrap().response, "250 Ok: queued");

    mailer.end_seq().await;
    server.finish().await;
}

#[tokio::test]
async fn test_sequential_send_reconnects_after_failure() {
    let broken = [
        handshake(),
        vec![
            Expect("MAIL FROM:<a@b.com>\r\n"),
            Send("421 4.3.2 Service shutting down\r\n"),
        ],
    ]
    .concat();
    let fresh = [handshake(), transaction("250 Ok: again\r\n"), quit()].concat();
    let server = FakeServer::start(vec![broken, fresh]).await;
    let mailer = Mailer::new(server.config().build());

    let err = mailer.send_seq(&message()).await.unwrap_err();
    assert!(err.is_transient());

    let outcome = mailer.send_seq(&message()).await.unwrap();
    assert_eq!(outcome.response, "250 Ok: again");

    mailer.end_seq().await;
    assert_eq!(server.finish().await.len(), 2);
}

#[tokio::test]
async fn test_sequential_send_after_timeout_reconnects() {
    let stalled = [handshake(), vec![Expect("MAIL FROM:<a@b.com>\r\n"), Stall]].concat();
    let fresh = [handshake(), transaction("250 Ok\r\n"), quit()].concat();
    let server = FakeServer::start(vec![stalled, fresh]).await;
    let mailer = Mailer::new(
        server
            .config()
            .send_timeout(Duration::from_millis(50))
            .build(),
    );

    let err = mailer.send_seq(&message()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { kind: TimeoutKind::Send, .. }));

    mailer.send_seq(&message()).await.unwrap();
    mailer.end_seq().await;
    server.finish().await;
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mailer = Mailer::new(
        Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build(),
    );
    let err = mailer.send(&message()).await.unwrap_err();
    assert!(matches!(err, Error::Connect { .. }));
}

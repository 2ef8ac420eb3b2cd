//! One-shot and sequential sending.
//!
//! A [`Mailer`] validates a [`SendData`] before touching the network, then
//! either opens a fresh connection per message ([`Mailer::send`]) or keeps one
//! authenticated connection across calls ([`Mailer::send_seq`]). Sequential
//! sends never overlap: a call made while another is still running fails with
//! [`Error::Busy`] and leaves the running transaction alone.
//!
//! ```ignore
//! let mailer = Mailer::new(Config::builder("smtp.example.com").build());
//! for data in batch {
//!     let outcome = mailer.send_seq(&data).await?;
//!     tracing::info!(response = %outcome.response, "sent");
//! }
//! mailer.end_seq().await;
//! ```

mod compose;
mod data;

use std::fmt;
use std::sync::Arc;

use postwire_mime::BodyType;
use tokio::sync::Mutex;

pub use compose::{AddressParser, MessageComposer, MimeAddressParser, MimeComposer};
pub use data::{SendData, SendOutcome};

use crate::connection::{Config, Connection};
use crate::error::{Error, Result, TimeoutKind};
use crate::protocol::{Envelope, State};

/// Sends messages with one connection per message, or one for a whole sequence.
pub struct Mailer {
    config: Config,
    body_type: BodyType,
    composer: Arc<dyn MessageComposer>,
    parser: Arc<dyn AddressParser>,
    slot: Mutex<Option<Connection>>,
}

impl Mailer {
    /// Creates a mailer with the `postwire-mime` composer and address parser.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            body_type: BodyType::Plain,
            composer: Arc::new(MimeComposer),
            parser: Arc::new(MimeAddressParser),
            slot: Mutex::new(None),
        }
    }

    /// Sets the body subtype used when a request does not name one.
    #[must_use]
    pub const fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = body_type;
        self
    }

    /// Replaces the message composer.
    #[must_use]
    pub fn with_composer(mut self, composer: impl MessageComposer + 'static) -> Self {
        self.composer = Arc::new(composer);
        self
    }

    /// Replaces the address parser.
    #[must_use]
    pub fn with_address_parser(mut self, parser: impl AddressParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Returns the connection configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Sends one message over a new connection, then QUITs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] before connecting if `data` is
    /// incomplete, [`Error::MessageRejected`] if the server refuses the
    /// message, or whatever ended the session.
    pub async fn send(&self, data: &SendData) -> Result<SendOutcome> {
        let (envelope, message) = self.prepare(data)?;

        let mut conn = Connection::open(&self.config).await?;
        let result = self.transact(&mut conn, envelope, &message).await;
        conn.quit().await;
        result
    }

    /// Sends one message over the stored connection, opening it first if
    /// needed.
    ///
    /// A fatal error or timeout drops the stored connection; the next call
    /// opens a fresh one. A refused message leaves it stored and idle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Busy`] immediately if another sequential send is
    /// running, plus the errors of [`Mailer::send`].
    pub async fn send_seq(&self, data: &SendData) -> Result<SendOutcome> {
        let mut slot = self.slot.try_lock().map_err(|_| Error::Busy)?;
        let (envelope, message) = self.prepare(data)?;

        // Abandoned mid-transaction by a dropped future
        if slot.as_ref().is_some_and(|conn| conn.state() != State::Idle)
            && let Some(mut stale) = slot.take()
        {
            tracing::debug!(state = ?stale.state(), "discarding stale connection");
            stale.close().await;
        }

        if slot.is_none() {
            *slot = Some(Connection::open(&self.config).await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(Error::Closed);
        };

        let result = self.transact(conn, envelope, &message).await;
        if conn.is_closed() {
            *slot = None;
        }
        result
    }

    /// Ends a sequence: QUITs and drops the stored connection, if any.
    pub async fn end_seq(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut conn) = slot.take() {
            conn.quit().await;
        }
    }

    /// Validates `data` and builds the envelope and payload.
    fn prepare(&self, data: &SendData) -> Result<(Envelope, Vec<u8>)> {
        let from = data
            .from
            .as_deref()
            .filter(|from| !from.trim().is_empty())
            .ok_or_else(|| Error::Validation("missing sender".into()))?;
        if data.subject.is_none() {
            return Err(Error::Validation("missing subject".into()));
        }

        let from = self.parser.parse(from)?;
        let mut to = Vec::new();
        for entry in data.recipient_fields() {
            to.extend(self.parser.parse_list(entry)?);
        }
        if to.is_empty() {
            return Err(Error::Validation("missing recipient".into()));
        }

        let body_type = data.content_type.unwrap_or(self.body_type);
        let message = self.composer.compose(data, body_type)?;
        Ok((Envelope::new(Some(from), to), message))
    }

    /// Runs one transaction under the send timeout.
    async fn transact(
        &self,
        conn: &mut Connection,
        envelope: Envelope,
        message: &[u8],
    ) -> Result<SendOutcome> {
        let recipients = envelope.to.len();
        let delivery = match self.config.send_timeout {
            Some(after) => {
                let outcome =
                    tokio::time::timeout(after, conn.send_message(envelope, message)).await;
                match outcome {
                    Ok(result) => result?,
                    Err(_) => {
                        tracing::warn!(?after, "send timed out");
                        conn.close().await;
                        return Err(Error::Timeout {
                            kind: TimeoutKind::Send,
                            after,
                        });
                    }
                }
            }
            None => conn.send_message(envelope, message).await?,
        };

        if !delivery.is_success() {
            return Err(Error::MessageRejected {
                code: delivery.code.as_u16(),
                message: delivery.response,
            });
        }

        tracing::info!(
            recipients,
            rejected = delivery.rejected.len(),
            response = %delivery.response,
            "message accepted"
        );
        Ok(SendOutcome {
            response: delivery.response,
            rejected: delivery.rejected,
        })
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("config", &self.config)
            .field("body_type", &self.body_type)
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
    use crate::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mailer() -> Mailer {
        // Port 9 (discard) is never reached: every case fails validation first
        Mailer::new(Config::builder("127.0.0.1").port(9).build())
    }

    fn valid() -> SendData {
        SendData::new()
            .from("Name <a@b.com>")
            .to("c@d.com, e@f.com")
            .bcc("g@h.com")
            .subject("S")
            .body("B")
    }

    #[test]
    fn test_prepare_flattens_recipients() {
        let (envelope, message) = mailer().prepare(&valid()).unwrap();
        assert_eq!(envelope.from.unwrap().as_str(), "a@b.com");
        let to: Vec<&str> = envelope.to.iter().map(Address::as_str).collect();
        assert_eq!(to, vec!["c@d.com", "e@f.com", "g@h.com"]);
        assert!(!String::from_utf8(message).unwrap().contains("g@h.com"));
    }

    #[tokio::test]
    async fn test_validation_errors_before_connect() {
        let mailer = mailer();
        let cases = [
            SendData { from: None, ..valid() },
            SendData { from: Some("  ".into()), ..valid() },
            SendData { subject: None, ..valid() },
            SendData { to: Vec::new(), bcc: Vec::new(), ..valid() },
            SendData { to: vec!["broken".into()], ..valid() },
        ];
        for data in cases {
            assert!(matches!(mailer.send(&data).await, Err(Error::Validation(_))));
            assert!(matches!(mailer.send_seq(&data).await, Err(Error::Validation(_))));
        }
        assert!(mailer.slot.lock().await.is_none());
    }

    #[test]
    fn test_request_body_type_wins() {
        struct Recorder(AtomicUsize);
        impl MessageComposer for Recorder {
            fn compose(&self, _data: &SendData, body_type: BodyType) -> Result<Vec<u8>> {
                if body_type == BodyType::Html {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
                Ok(b"x".to_vec())
            }
        }

        let recorder = Arc::new(Recorder(AtomicUsize::new(0)));
        let plain = Mailer {
            composer: recorder.clone(),
            ..mailer()
        };
        plain.prepare(&valid()).unwrap();
        plain.prepare(&valid().content_type(BodyType::Html)).unwrap();
        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);

        let html = Mailer {
            composer: recorder.clone(),
            ..mailer().with_body_type(BodyType::Html)
        };
        html.prepare(&valid()).unwrap();
        assert_eq!(recorder.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_busy_while_locked() {
        let mailer = mailer();
        let guard = mailer.slot.lock().await;
        assert!(matches!(mailer.send_seq(&valid()).await, Err(Error::Busy)));
        drop(guard);
    }

    #[tokio::test]
    async fn test_end_seq_without_connection() {
        let mailer = mailer();
        mailer.end_seq().await;
        assert!(mailer.slot.lock().await.is_none());
    }
}

//! # postwire-smtp
//!
//! An SMTP client engine: greeting, EHLO with HELO fallback, opportunistic
//! STARTTLS, SASL authentication, envelope with per-recipient soft failures
//! and a correctly terminated DATA phase.
//!
//! ## Features
//!
//! - **Sans-I/O state machine**: [`protocol::Protocol`] consumes replies and
//!   produces commands and events; it never touches a socket
//! - **Chunk-tolerant framing**: [`parser::ReplyFramer`] reassembles
//!   multi-line replies split at arbitrary byte boundaries
//! - **TLS**: implicit TLS (port 465) and STARTTLS via rustls
//! - **Authentication**: PLAIN, LOGIN, XOAUTH and XOAUTH2 with bounded token
//!   refresh
//! - **Sequential sends**: [`Mailer::send_seq`] reuses one authenticated
//!   connection and refuses overlapping calls
//!
//! ## Quick Start
//!
//! ```ignore
//! use postwire_smtp::{Auth, Config, Mailer, SendData};
//!
//! #[tokio::main]
//! async fn main() -> postwire_smtp::Result<()> {
//!     let config = Config::builder("smtp.example.com")
//!         .port(587)
//!         .auth(Auth::login("user@example.com", "password"))
//!         .build();
//!     let mailer = Mailer::new(config);
//!
//!     let outcome = mailer
//!         .send(
//!             &SendData::new()
//!                 .from("Sender <sender@example.com>")
//!                 .to("recipient@example.com")
//!                 .subject("Hello")
//!                 .body("Hello, World!"),
//!         )
//!         .await?;
//!     println!("{}", outcome.response);
//!     Ok(())
//! }
//! ```
//!
//! ## Session States
//!
//! ```text
//! Greeting ─→ Ehlo ─┬─→ StartTls ─→ TlsHandshake ─→ Ehlo
//!                   ├─→ Helo
//!                   └─→ Auth* ─→ Idle ─→ MailFrom ─→ RcptTo* ─→ Data ─→ Streaming ─→ DataEnd ─→ Idle
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Configuration, transports and the async connection driver
//! - [`parser`]: Reply framing
//! - [`protocol`]: Sans-I/O state machine and auth negotiation
//! - [`sender`]: One-shot and sequential sending
//! - [`types`]: Addresses, replies and capabilities

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod protocol;
pub mod sender;
pub mod types;

pub use connection::{Auth, Config, ConfigBuilder, Connection, Security, StaticToken, TokenSource};
pub use error::{Error, Result, Stage, TimeoutKind};
pub use protocol::{Delivery, Envelope, Event, State};
pub use sender::{Mailer, SendData, SendOutcome};
pub use types::{Address, AuthMechanism, Capabilities, Reply, ReplyCode};

pub use postwire_mime::BodyType;
pub use postwire_oauth::{XOAuth2Generator, XOAuth2Options};

//! # postwire-mime
//!
//! Mailbox parsing and single-part message composition.
//!
//! ## Features
//!
//! - **Mailboxes**: `Name <local@domain>` and bare addresses, comma separated lists
//! - **Messages**: `text/plain` or `text/html` bodies in UTF-8 with `From`,
//!   `To`, `Cc`, `Subject` and `Date` headers
//! - **Encoding**: Quoted-Printable bodies and RFC 2047 headers
//!
//! ## Quick Start
//!
//! ```
//! use postwire_mime::{BodyType, Mailbox, Message};
//!
//! let message = Message::builder()
//!     .from(Mailbox::parse("Sender <sender@example.com>")?)
//!     .to(Mailbox::parse("recipient@example.com")?)
//!     .subject("Grüße")
//!     .body("Hello, World!")
//!     .body_type(BodyType::Plain)
//!     .build()?;
//!
//! let wire = message.to_bytes();
//! assert!(wire.starts_with(b"From: Sender <sender@example.com>\r\n"));
//! # Ok::<(), postwire_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::Mailbox;
pub use content_type::{BodyType, ContentType};
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, MessageBuilder, TransferEncoding};

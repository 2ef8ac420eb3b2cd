//! SMTP connection management.

mod client;
mod config;
mod stream;

pub use client::Connection;
pub use config::{
    Auth, Config, ConfigBuilder, DEFAULT_GREETING_TIMEOUT, Security, StaticToken, TokenFuture,
    TokenSource, default_client_name,
};
pub use stream::{SmtpStream, Transport, connect, connect_tls, create_tls_connector};

//! # postwire-oauth
//!
//! Token plumbing for SMTP `XOAUTH2` authentication.
//!
//! ## Features
//!
//! - **Token generator**: [`XOAuth2Generator`] caches an access token and
//!   refreshes it against the provider's token endpoint on demand
//! - **SASL payloads**: PLAIN and `XOAUTH2` initial responses, plus decoding of
//!   the JSON error a server sends in a `334` challenge
//! - **Provider endpoints**: Google by default, or any custom token URL
//!
//! ## Quick Start
//!
//! ```ignore
//! use postwire_oauth::{XOAuth2Generator, XOAuth2Options};
//!
//! let generator = XOAuth2Generator::new(XOAuth2Options {
//!     user: "user@gmail.com".into(),
//!     client_id: "client-id".into(),
//!     client_secret: Some("client-secret".into()),
//!     refresh_token: Some("1/refresh".into()),
//!     access_token: None,
//!     token_url: None,
//! })?;
//!
//! // Cached token, or a fresh one if none is cached yet
//! let auth_string = generator.get_token().await?;
//! // Send: AUTH XOAUTH2 {auth_string}
//!
//! // After the server refused the token
//! let auth_string = generator.generate_token().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod generator;
pub mod provider;
pub mod sasl;
pub mod token;

pub use client::OAuthClient;
pub use error::{Error, Result};
pub use generator::{XOAuth2Generator, XOAuth2Options};
pub use provider::Provider;
pub use token::Token;

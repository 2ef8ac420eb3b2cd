//! Error types for message composition.

/// Result type alias for MIME operations.
pub type Result<T> = std::result::Result<T, Error>;

/// MIME error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mailbox could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Header name or value that cannot be written.
    #[error("Invalid MIME header: {0}")]
    InvalidHeader(String),

    /// Invalid content type.
    #[error("Invalid content type: {0}")]
    InvalidContentType(String),

    /// Missing required header.
    #[error("Missing required header: {0}")]
    MissingHeader(String),
}

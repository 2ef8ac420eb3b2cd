//! Outgoing protocol data.
//!
// Allow missing_const_for_fn since Vec methods aren't const in stable Rust.
#![allow(clippy::missing_const_for_fn)]

/// Bytes the driver must write to the server, in queue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Raw bytes to send to the server.
    pub data: Vec<u8>,
}

impl Transmit {
    /// Creates a new transmit from bytes.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Returns the data as a string slice, if valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Returns the length of the data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the transmit is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Transmit {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for Transmit {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl AsRef<[u8]> for Transmit {
    fn as_ref(&self) -> &[u8] {
        &self.data
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
    fn test_transmit_accessors() {
        let t: Transmit = b"QUIT\r\n".as_slice().into();
        assert_eq!(t.as_str(), Some("QUIT\r\n"));
        assert_eq!(t.len(), 6);
        assert!(!t.is_empty());
        assert_eq!(t.as_ref(), b"QUIT\r\n");
    }

    #[test]
    fn test_transmit_non_utf8() {
        let t = Transmit::from(vec![0xff, 0xfe]);
        assert_eq!(t.as_str(), None);
    }
}

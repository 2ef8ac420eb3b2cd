//! SMTP reply types.

/// A complete, possibly multi-line, SMTP reply.
///
/// `text` holds every line exactly as received (codes included), joined by
/// CRLF with the trailing line break removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code of the reply's first line.
    pub code: ReplyCode,
    /// Full reply text.
    pub text: String,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code.is_intermediate()
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient_error(&self) -> bool {
        self.code.is_transient()
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code.is_permanent()
    }

    /// Iterates over the raw reply lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.lines().map(|line| line.trim_end_matches('\r'))
    }

    /// Returns the reply text with the code prefix stripped from every line.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines()
            .map(|line| line.get(4..).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Parses the three leading ASCII digits of a reply line.
    #[must_use]
    pub fn parse(line: &[u8]) -> Option<Self> {
        match line {
            [a, b, c, ..] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
                Some(Self(
                    u16::from(a - b'0') * 100 + u16::from(b - b'0') * 10 + u16::from(c - b'0'),
                ))
            }
            _ => None,
        }
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the leading digit (reply class).
    #[must_use]
    pub const fn class(self) -> u16 {
        self.0 / 100
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.class() == 4
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.class() == 5
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.class() == 3
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

// Reply codes the client reacts to
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
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

    mod reply_code_tests {
        use super::*;

        #[test]
        fn classes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::SERVICE_READY.is_success());
            assert!(ReplyCode::START_DATA.is_intermediate());
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
            assert!(!ReplyCode::AUTH_FAILED.is_success());
        }

        #[test]
        fn parse_leading_digits() {
            assert_eq!(ReplyCode::parse(b"250 OK"), Some(ReplyCode::OK));
            assert_eq!(ReplyCode::parse(b"354"), Some(ReplyCode::START_DATA));
            assert_eq!(ReplyCode::parse(b"25"), None);
            assert_eq!(ReplyCode::parse(b"2x0 nope"), None);
            assert_eq!(ReplyCode::parse(b""), None);
        }

        #[test]
        fn display_is_zero_padded() {
            assert_eq!(ReplyCode::OK.to_string(), "250");
            assert_eq!(ReplyCode::new(42).to_string(), "042");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn message_strips_codes() {
            let reply = Reply::new(
                ReplyCode::OK,
                "250-smtp.example.com Hello\r\n250-PIPELINING\r\n250 AUTH PLAIN",
            );
            assert_eq!(
                reply.message(),
                "smtp.example.com Hello\nPIPELINING\nAUTH PLAIN"
            );
            assert_eq!(reply.lines().count(), 3);
        }

        #[test]
        fn bare_code_has_empty_message() {
            let reply = Reply::new(ReplyCode::START_DATA, "354");
            assert_eq!(reply.message(), "");
            assert_eq!(reply.to_string(), "354");
        }

        #[test]
        fn predicates_follow_code() {
            let reply = Reply::new(ReplyCode::new(451), "451 later");
            assert!(reply.is_transient_error());
            assert!(!reply.is_success());
            assert!(!reply.is_permanent_error());
        }
    }
}

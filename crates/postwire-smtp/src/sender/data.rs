//! Send requests and their outcomes.

use postwire_mime::BodyType;

/// One message to send.
///
/// Every address field accepts `Name <local@domain>` or a bare address, and
/// each entry of `to`, `cc` and `bcc` may itself be a comma separated list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendData {
    /// Sender.
    pub from: Option<String>,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Copy recipients.
    pub cc: Vec<String>,
    /// Blind copy recipients; envelope only, never written to a header.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: Option<String>,
    /// Body text.
    pub body: String,
    /// Body subtype; the mailer's default when `None`.
    pub content_type: Option<BodyType>,
}

impl SendData {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Adds a primary recipient (or a comma separated list).
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// Adds a copy recipient.
    #[must_use]
    pub fn cc(mut self, cc: impl Into<String>) -> Self {
        self.cc.push(cc.into());
        self
    }

    /// Adds a blind copy recipient.
    #[must_use]
    pub fn bcc(mut self, bcc: impl Into<String>) -> Self {
        self.bcc.push(bcc.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the body text.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the body subtype.
    #[must_use]
    pub const fn content_type(mut self, content_type: BodyType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    /// Iterates over every recipient field entry: to, then cc, then bcc.
    pub(crate) fn recipient_fields(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

/// Result of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Final server reply, verbatim.
    pub response: String,
    /// Recipients the server refused while still accepting the message.
    pub rejected: Vec<String>,
}

impl SendOutcome {
    /// Returns true if every recipient was accepted.
    #[must_use]
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty()
    }
}

//! Content types for single-part text bodies.

use std::fmt;

/// Subtype of a `text/*` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    /// `text/plain`.
    #[default]
    Plain,
    /// `text/html`.
    Html,
}

impl BodyType {
    /// Maps a MIME type string to a body type.
    ///
    /// Only `text/plain` and `text/html` are recognized; anything else is `None`.
    #[must_use]
    pub fn from_mime(s: &str) -> Option<Self> {
        let essence = s.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("text/html") {
            Some(Self::Html)
        } else if essence.eq_ignore_ascii_case("text/plain") {
            Some(Self::Plain)
        } else {
            None
        }
    }

    /// Returns the subtype name.
    #[must_use]
    pub const fn subtype(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
        }
    }

    /// Returns the UTF-8 content type for this body type.
    #[must_use]
    pub fn content_type(self) -> ContentType {
        ContentType::new("text", self.subtype()).with_parameter("charset", "utf-8")
    }
}

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html").
    pub sub_type: String,
    /// Parameters in insertion order (e.g., charset=utf-8).
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a `text/plain; charset=utf-8` content type.
    #[must_use]
    pub fn text_plain() -> Self {
        BodyType::Plain.content_type()
    }

    /// Creates a `text/html; charset=utf-8` content type.
    #[must_use]
    pub fn text_html() -> Self {
        BodyType::Html.content_type()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("charset"))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            if value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c)) {
                write!(f, "; {key}=\"{value}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
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
    fn test_body_type_from_mime() {
        assert_eq!(BodyType::from_mime("text/html"), Some(BodyType::Html));
        assert_eq!(BodyType::from_mime(" TEXT/HTML; charset=utf-8"), Some(BodyType::Html));
        assert_eq!(BodyType::from_mime("text/plain"), Some(BodyType::Plain));
        assert_eq!(BodyType::from_mime("application/json"), None);
        assert_eq!(BodyType::from_mime(""), None);
    }

    #[test]
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert_eq!(ct.sub_type, "plain");
        assert_eq!(ct.charset(), Some("utf-8"));
        assert_eq!(ct.to_string(), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_text_html() {
        assert_eq!(ContentType::text_html().to_string(), "text/html; charset=utf-8");
    }

    #[test]
    fn test_quoted_parameter() {
        let ct = ContentType::new("text", "plain").with_parameter("name", "a b.txt");
        assert_eq!(ct.to_string(), "text/plain; name=\"a b.txt\"");
    }
}

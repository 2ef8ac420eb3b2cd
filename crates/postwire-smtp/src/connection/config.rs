//! Connection configuration types.

use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use postwire_oauth::XOAuth2Generator;
use tokio_rustls::rustls::ClientConfig;

use crate::error::Result;
use crate::protocol::{AuthSettings, ProtocolConfig};

/// Default time to wait for the 220 greeting.
pub const DEFAULT_GREETING_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// Plaintext; STARTTLS is ignored even when offered.
    None,
    /// Start with plaintext, upgrade with STARTTLS when the server offers it.
    #[default]
    StartTls,
    /// TLS from the start (port 465).
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 25,
            Self::Implicit => 465,
        }
    }
}

/// Boxed future returned by [`TokenSource::token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

/// Supplies ready-to-send `XOAUTH`/`XOAUTH2` strings.
pub trait TokenSource: Send + Sync {
    /// Returns a token; `refresh` is set when the server refused the last one.
    fn token(&self, refresh: bool) -> TokenFuture<'_>;
}

/// A token that never changes.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a pre-encoded token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self, _refresh: bool) -> TokenFuture<'_> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }
}

impl TokenSource for XOAuth2Generator {
    fn token(&self, refresh: bool) -> TokenFuture<'_> {
        Box::pin(async move {
            let token = if refresh {
                self.generate_token().await?
            } else {
                self.get_token().await?
            };
            Ok(token)
        })
    }
}

/// Credentials.
#[derive(Clone, Default)]
pub struct Auth {
    /// Username for PLAIN and LOGIN.
    pub user: Option<String>,
    /// Password for PLAIN and LOGIN.
    pub pass: Option<String>,
    /// `XOAUTH` token source; used when the server offers `XOAUTH`.
    pub xoauth: Option<Arc<dyn TokenSource>>,
    /// `XOAUTH2` token source; used when the server offers `XOAUTH2`.
    pub xoauth2: Option<Arc<dyn TokenSource>>,
    /// Mechanism override, e.g. `"LOGIN"`.
    pub method: Option<String>,
}

impl Auth {
    /// Username and password credentials.
    #[must_use]
    pub fn login(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            pass: Some(pass.into()),
            ..Self::default()
        }
    }

    /// Static `XOAUTH` token.
    #[must_use]
    pub fn xoauth_token(token: impl Into<String>) -> Self {
        Self {
            xoauth: Some(Arc::new(StaticToken::new(token))),
            ..Self::default()
        }
    }

    /// `XOAUTH2` token source, typically an [`XOAuth2Generator`].
    #[must_use]
    pub fn xoauth2(source: impl TokenSource + 'static) -> Self {
        Self {
            xoauth2: Some(Arc::new(source)),
            ..Self::default()
        }
    }

    /// Forces a mechanism instead of the first one the server offers.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub(crate) fn settings(&self) -> AuthSettings {
        AuthSettings {
            user: self.user.clone(),
            pass: self.pass.clone(),
            xoauth: self.xoauth.is_some(),
            xoauth2: self.xoauth2.is_some(),
            method: self.method.clone(),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auth")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("xoauth", &self.xoauth.is_some())
            .field("xoauth2", &self.xoauth2.is_some())
            .field("method", &self.method)
            .finish()
    }
}

/// SMTP connection configuration.
#[derive(Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Credentials; `None` skips authentication.
    pub auth: Option<Auth>,
    /// Name sent with EHLO/HELO.
    pub client_name: String,
    /// Time to wait for the 220 greeting.
    pub greeting_timeout: Duration,
    /// Bound on TCP connect plus implicit TLS handshake.
    pub connection_timeout: Option<Duration>,
    /// Bound on one mail transaction.
    pub send_timeout: Option<Duration>,
    /// Log the wire transcript.
    pub debug: bool,
    /// Tag for transcript lines.
    pub instance_id: Option<String>,
    /// TLS settings; webpki roots when `None`.
    pub tls: Option<Arc<ClientConfig>>,
}

impl Config {
    /// Creates a STARTTLS configuration on port 25.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    pub(crate) fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            client_name: self.client_name.clone(),
            starttls: self.security == Security::StartTls,
            secure: self.security == Security::Implicit,
            auth: self.auth.as_ref().map(Auth::settings),
            debug: self.debug,
            instance_id: self.instance_id.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("auth", &self.auth)
            .field("client_name", &self.client_name)
            .field("greeting_timeout", &self.greeting_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("send_timeout", &self.send_timeout)
            .field("debug", &self.debug)
            .field("instance_id", &self.instance_id)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    auth: Option<Auth>,
    client_name: Option<String>,
    greeting_timeout: Duration,
    connection_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    debug: bool,
    instance_id: Option<String>,
    tls: Option<Arc<ClientConfig>>,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::default(),
            auth: None,
            client_name: None,
            greeting_timeout: DEFAULT_GREETING_TIMEOUT,
            connection_timeout: None,
            send_timeout: None,
            debug: false,
            instance_id: None,
            tls: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the EHLO/HELO name.
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    /// Sets the greeting timeout.
    #[must_use]
    pub const fn greeting_timeout(mut self, timeout: Duration) -> Self {
        self.greeting_timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the per-transaction send timeout.
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Enables the wire transcript.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the transcript tag.
    #[must_use]
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the TLS client configuration.
    #[must_use]
    pub fn tls(mut self, tls: Arc<ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            auth: self.auth,
            client_name: self.client_name.unwrap_or_else(default_client_name),
            greeting_timeout: self.greeting_timeout,
            connection_timeout: self.connection_timeout,
            send_timeout: self.send_timeout,
            debug: self.debug,
            instance_id: self.instance_id,
            tls: self.tls,
        }
    }
}

/// EHLO name derived from the machine's hostname.
#[must_use]
pub fn default_client_name() -> String {
    client_name_from(&gethostname::gethostname().to_string_lossy())
}

fn client_name_from(hostname: &str) -> String {
    if hostname.parse::<Ipv4Addr>().is_ok() {
        format!("[{hostname}]")
    } else if hostname.contains('.') {
        hostname.to_string()
    } else {
        "[127.0.0.1]".to_string()
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
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 25);
        assert_eq!(Security::StartTls.default_port(), 25);
        assert_eq!(Security::Implicit.default_port(), 465);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 25);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.greeting_timeout, Duration::from_secs(10));
        assert!(config.connection_timeout.is_none());
        assert!(config.send_timeout.is_none());
        assert!(!config.client_name.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("smtp.example.com")
            .security(Security::Implicit)
            .client_name("client.example.com")
            .send_timeout(Duration::from_millis(50))
            .connection_timeout(Duration::from_secs(3))
            .auth(Auth::login("user", "pass").with_method("login"))
            .build();

        assert_eq!(config.port, 465);
        assert_eq!(config.send_timeout, Some(Duration::from_millis(50)));

        let protocol = config.protocol_config();
        assert!(protocol.secure);
        assert!(!protocol.starttls);
        assert_eq!(protocol.client_name, "client.example.com");
        let auth = protocol.auth.unwrap();
        assert_eq!(auth.method.as_deref(), Some("login"));
        assert!(!auth.xoauth2);
    }

    #[test]
    fn test_security_none_ignores_starttls() {
        let protocol = Config::builder("h")
            .security(Security::None)
            .port(2525)
            .build()
            .protocol_config();
        assert!(!protocol.starttls);
        assert!(!protocol.secure);
    }

    #[test]
    fn test_client_name_rules() {
        assert_eq!(client_name_from("mail.example.com"), "mail.example.com");
        assert_eq!(client_name_from("laptop"), "[127.0.0.1]");
        assert_eq!(client_name_from("10.0.0.7"), "[10.0.0.7]");
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config::builder("h")
            .auth(Auth::login("user", "hunter2"))
            .build();
        assert!(!format!("{config:?}").contains("hunter2"));
        assert_eq!(
            format!("{:?}", StaticToken::new("secret")),
            "StaticToken(<redacted>)"
        );
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let auth = Auth::xoauth_token("dG9rZW4=");
        let source = auth.xoauth.clone().unwrap();
        assert_eq!(source.token(false).await.unwrap(), "dG9rZW4=");
        assert_eq!(source.token(true).await.unwrap(), "dG9rZW4=");
        assert!(auth.settings().xoauth);
    }
}

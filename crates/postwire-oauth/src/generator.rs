//! Cached `XOAUTH2` token generator.

use tokio::sync::Mutex;

use crate::client::OAuthClient;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::sasl::xoauth2_response;
use crate::token::Token;

/// Settings for an [`XOAuth2Generator`].
#[derive(Clone, Default)]
pub struct XOAuth2Options {
    /// Mailbox the token is for.
    pub user: String,
    /// `OAuth2` client ID.
    pub client_id: String,
    /// `OAuth2` client secret.
    pub client_secret: Option<String>,
    /// Refresh token; required unless `access_token` never expires.
    pub refresh_token: Option<String>,
    /// Access token to use until the first refresh.
    pub access_token: Option<String>,
    /// Token endpoint; defaults to Google's.
    pub token_url: Option<String>,
}

impl std::fmt::Debug for XOAuth2Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XOAuth2Options")
            .field("user", &self.user)
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

/// Produces base64 `XOAUTH2` strings, refreshing the access token as needed.
///
/// Concurrent callers share one cached token; a refresh holds the cache lock
/// so the endpoint is hit once per refresh.
#[derive(Debug)]
pub struct XOAuth2Generator {
    user: String,
    client: OAuthClient,
    token: Mutex<Token>,
}

impl XOAuth2Generator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns an error if `user` is empty or `token_url` is invalid.
    pub fn new(options: XOAuth2Options) -> Result<Self> {
        if options.user.is_empty() {
            return Err(Error::InvalidConfig("XOAUTH2 user is required".into()));
        }

        let provider = match options.token_url.as_deref() {
            Some(url) => Provider::new("custom", url)?,
            None => Provider::google()?,
        };

        let mut client = OAuthClient::new(options.client_id, provider);
        if let Some(secret) = options.client_secret {
            client = client.with_client_secret(secret);
        }

        let token = Token {
            access_token: options.access_token.unwrap_or_default(),
            expires_at: None,
            refresh_token: options.refresh_token,
        };

        Ok(Self {
            user: options.user,
            client,
            token: Mutex::new(token),
        })
    }

    /// Returns the mailbox the token is for.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the auth string for the cached token, refreshing first if there
    /// is none or it has expired.
    ///
    /// # Errors
    ///
    /// Returns an error if a needed refresh fails.
    pub async fn get_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if !token.is_usable() {
            *token = self.client.refresh_token(&token).await?;
        }
        Ok(xoauth2_response(&self.user, &token.access_token))
    }

    /// Refreshes the access token unconditionally and returns the new auth string.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no refresh token or the refresh fails.
    pub async fn generate_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        *token = self.client.refresh_token(&token).await?;
        tracing::debug!(user = %self.user, "generated new XOAUTH2 token");
        Ok(xoauth2_response(&self.user, &token.access_token))
    }

    /// Returns the current access token, possibly empty.
    pub async fn access_token(&self) -> String {
        self.token.lock().await.access_token.clone()
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn options() -> XOAuth2Options {
        XOAuth2Options {
            user: "user@example.com".into(),
            client_id: "client".into(),
            client_secret: Some("secret".into()),
            ..XOAuth2Options::default()
        }
    }

    /// Serves one canned HTTP response and returns the request it received.
    async fn token_endpoint(status: &str, body: &str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8(request).unwrap()
        });

        (url, handle)
    }

    #[test]
    fn test_requires_user() {
        let err = XOAuth2Generator::new(XOAuth2Options::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let out = format!(
            "{:?}",
            XOAuth2Options {
                refresh_token: Some("1/very-secret".into()),
                ..options()
            }
        );
        assert!(!out.contains("very-secret"));
        assert!(!out.contains("\"secret\""));
    }

    #[tokio::test]
    async fn test_cached_access_token() {
        let generator = XOAuth2Generator::new(XOAuth2Options {
            access_token: Some("cached".into()),
            ..options()
        })
        .unwrap();

        let token = generator.get_token().await.unwrap();
        assert_eq!(token, xoauth2_response("user@example.com", "cached"));
    }

    #[tokio::test]
    async fn test_generate_without_refresh_token() {
        let generator = XOAuth2Generator::new(XOAuth2Options {
            access_token: Some("cached".into()),
            ..options()
        })
        .unwrap();
        assert!(matches!(
            generator.generate_token().await,
            Err(Error::NoRefreshToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_against_endpoint() {
        let (url, server) = token_endpoint(
            "200 OK",
            r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3600}"#,
        )
        .await;

        let generator = XOAuth2Generator::new(XOAuth2Options {
            refresh_token: Some("1/refresh".into()),
            token_url: Some(url),
            ..options()
        })
        .unwrap();

        let token = generator.get_token().await.unwrap();
        assert_eq!(token, xoauth2_response("user@example.com", "fresh"));
        assert_eq!(generator.access_token().await, "fresh");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /token"));
        assert!(request.contains("grant_type=refresh_token"));
        assert!(request.contains("client_secret=secret"));
    }

    #[tokio::test]
    async fn test_refresh_error_surfaces() {
        let (url, server) = token_endpoint(
            "400 Bad Request",
            r#"{"error":"invalid_grant","error_description":"Token has been revoked."}"#,
        )
        .await;

        let generator = XOAuth2Generator::new(XOAuth2Options {
            refresh_token: Some("1/revoked".into()),
            token_url: Some(url),
            ..options()
        })
        .unwrap();

        let err = generator.generate_token().await.unwrap_err();
        assert!(matches!(err, Error::OAuth { ref error, .. } if error == "invalid_grant"));
        server.await.unwrap();
    }
}

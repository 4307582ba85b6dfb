//! Access token sources for the Drive tier.
//!
//! # Design
//! - `StaticToken` serves a pre-issued token for short runs and tests.
//! - `RefreshingToken` exchanges a stored refresh token at the OAuth token endpoint and
//!   caches the result until shortly before it expires. No user interaction is involved.

use std::time::Duration;

use async_trait::async_trait;
use backhaul_core::BackupResult;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::http::{REQUEST_TIMEOUT, decode, send};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are renewed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies a bearer token for each Drive request.
#[async_trait]
pub trait TokenSource: Send + Sync + std::fmt::Debug {
    /// Current access token.
    async fn access_token(&self) -> BackupResult<String>;
}

/// Token provided up front through configuration.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wrap a pre-issued token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> BackupResult<String> {
        Ok(self.token.clone())
    }
}

/// OAuth client credentials plus the long-lived refresh token.
#[derive(Clone)]
pub struct RefreshCredentials {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Refresh token issued during the one-time consent.
    pub refresh_token: String,
}

impl std::fmt::Debug for RefreshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    renew_at: Instant,
}

/// Token source that renews access tokens through the refresh-token grant.
pub struct RefreshingToken {
    client: Client,
    token_url: Url,
    credentials: RefreshCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshingToken {
    /// Build a source posting to `token_url` (normally `https://oauth2.googleapis.com/token`).
    #[must_use]
    pub fn new(client: Client, token_url: Url, credentials: RefreshCredentials) -> Self {
        Self {
            client,
            token_url,
            credentials,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> BackupResult<CachedToken> {
        let request = self
            .client
            .post(self.token_url.clone())
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("refresh_token", self.credentials.refresh_token.as_str()),
            ]);
        let response = send("drive.token_refresh", "oauth_token", request).await?;
        let issued: TokenResponse = decode("drive.token_refresh", "oauth_token", response).await?;
        let lifetime = issued
            .expires_in
            .map_or(DEFAULT_LIFETIME, Duration::from_secs);
        info!(expires_in_secs = lifetime.as_secs(), "drive access token refreshed");
        Ok(CachedToken {
            value: issued.access_token,
            renew_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

impl std::fmt::Debug for RefreshingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshingToken")
            .field("token_url", &self.token_url.as_str())
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenSource for RefreshingToken {
    async fn access_token(&self) -> BackupResult<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.renew_at
        {
            return Ok(token.value.clone());
        }
        debug!("drive access token missing or expiring; refreshing");
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backhaul_core::BackupError;
    use httpmock::prelude::*;
    use serde_json::json;

    fn credentials() -> RefreshCredentials {
        RefreshCredentials {
            client_id: "client-1".into(),
            client_secret: "shh".into(),
            refresh_token: "1//refresh".into(),
        }
    }

    fn source_for(server: &MockServer) -> anyhow::Result<RefreshingToken> {
        Ok(RefreshingToken::new(
            Client::new(),
            server.url("/token").parse()?,
            credentials(),
        ))
    }

    #[tokio::test]
    async fn refreshed_token_is_cached_until_expiry() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=refresh_token")
                .body_includes("client_id=client-1")
                .body_includes("refresh_token=1%2F%2Frefresh");
            then.status(200).json_body(json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            }));
        });
        let source = source_for(&server)?;

        assert_eq!(source.access_token().await?, "ya29.fresh");
        assert_eq!(source.access_token().await?, "ya29.fresh");

        mock.assert_calls(1);
        Ok(())
    }

    #[tokio::test]
    async fn short_lived_tokens_are_renewed_on_every_use() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(json!({ "access_token": "ya29.brief", "expires_in": 30 }));
        });
        let source = source_for(&server)?;

        source.access_token().await?;
        source.access_token().await?;

        mock.assert_calls(2);
        Ok(())
    }

    #[tokio::test]
    async fn revoked_refresh_token_surfaces_status() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400).json_body(json!({ "error": "invalid_grant" }));
        });

        let result = source_for(&server)?.access_token().await;

        assert!(matches!(
            result,
            Err(BackupError::HttpStatus {
                operation: "drive.token_refresh",
                status: 400,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("client-1"));
        assert!(!rendered.contains("shh"));
        assert!(!rendered.contains("1//refresh"));
    }
}

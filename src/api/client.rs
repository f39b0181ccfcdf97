//! Authenticated HTTP client for the Spotify Web API
//!
//! Wraps reqwest::Client with bearer token injection, a single inline
//! refresh-and-retry on 401, and status mapping.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::auth::TokenManager;
use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ApiError {
    /// No session, or the stored session could not be refreshed.
    #[error("No valid access token")]
    NotAuthenticated,
    /// The server rejected the token and the inline refresh failed.
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// A 2xx response whose body is not valid JSON. The write most likely
    /// went through.
    #[error("HTTP {status} with unreadable body: {source}")]
    MalformedBody {
        status: u16,
        #[source]
        source: serde_json::Error,
    },
    /// The body was JSON but not the expected shape.
    #[error("unexpected response shape: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ApiError {
    /// A parse-only failure: success cannot be ruled out and must be
    /// verified by a follow-up read.
    pub fn is_inconclusive(&self) -> bool {
        matches!(self, ApiError::MalformedBody { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ApiError::NotAuthenticated | ApiError::AuthenticationFailed
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self.status() {
            Some(403) => "Spotify Premium is required to control playback".to_string(),
            Some(404) => "No active Spotify device found".to_string(),
            _ => self.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Authenticated Spotify Web API client.
#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenManager>,
}

impl SpotifyClient {
    pub fn new(tokens: Arc<TokenManager>, base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// Client for CLI commands: loads config and the stored session.
    pub async fn connect() -> anyhow::Result<Self> {
        let config = Config::load()?;
        let tokens = TokenManager::from_config(&config)?;
        if !tokens.is_authenticated().await {
            anyhow::bail!("Not logged in. Run 'miniplayer login' first.");
        }
        Self::new(Arc::new(tokens), &config.api_base_url)
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Issue a request. `Ok(None)` means no content (204 or an empty body).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let token = self
            .tokens
            .valid_access_token()
            .await
            .ok_or(ApiError::NotAuthenticated)?;
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let mut resp = self.send(&method, &url, query, body, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::info!("401 for {}, refreshing token and retrying once", url);
            let token = match self.tokens.force_refresh().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!("Inline refresh failed: {:#}", e);
                    return Err(ApiError::AuthenticationFailed);
                }
            };
            resp = self.send(&method, &url, query, body, &token).await?;
        }

        read_response(resp, &url).await
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        } else if *method != Method::GET && *method != Method::DELETE {
            // Spotify wants a Content-Length on bodiless writes.
            req = req.header(reqwest::header::CONTENT_LENGTH, "0");
        }

        req.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })
    }

    /// GET and decode. `Ok(None)` for no content.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, ApiError> {
        match self.request(Method::GET, path, query, None).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(ApiError::Decode),
            None => Ok(None),
        }
    }

    /// GET that must return a body.
    pub async fn get_required<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.get(path, query).await?.ok_or_else(|| ApiError::Http {
            status: 204,
            message: format!("empty response for {}", path),
        })
    }

    /// Write call whose body, if any, is ignored once it parses.
    pub async fn write(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(), ApiError> {
        self.request(method, path, query, body).await.map(|_| ())
    }
}

/// Check the status and parse the body.
async fn read_response(resp: reqwest::Response, url: &str) -> Result<Option<Value>, ApiError> {
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }

    let text = resp.text().await.map_err(|source| ApiError::Transport {
        url: url.to_string(),
        source,
    })?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        return Err(ApiError::Http {
            status: status.as_u16(),
            message,
        });
    }

    if text.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ApiError::MalformedBody {
            status: status.as_u16(),
            source,
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::auth::tokens::{MemoryTokenStore, TokenRecord};
    use crate::auth::AuthConfig;
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::MockServer;

    /// Client against `server` holding a valid token `access`. The token
    /// endpoint lives on the same server under `/api/token`.
    pub fn client_for(server: &MockServer, access: &str, expires_in_secs: i64) -> SpotifyClient {
        let store = MemoryTokenStore::with_record(TokenRecord {
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        });
        let auth = AuthConfig {
            client_id: "test-client".to_string(),
            authorize_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/api/token", server.uri()),
        };
        let tokens = Arc::new(TokenManager::new(auth, store));
        SpotifyClient::new(tokens, &format!("{}/v1", server.uri())).unwrap()
    }
}

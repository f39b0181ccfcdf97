//! OAuth2 authorization code flow with PKCE, plus refresh-before-expiry

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    reqwest::async_http_client,
    AuthType, AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse,
    TokenUrl,
};
use tokio::sync::{watch, Mutex, MutexGuard};
use url::Url;

use super::callback::CallbackListener;
use super::tokens::{TokenRecord, TokenStore};
use super::{AuthConfig, SCOPES};
use crate::config::Config;

/// How long the loopback listener waits for the browser redirect.
const AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(300);

/// Authentication state broadcast to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    LoggedIn,
    LoggedOut,
}

/// Material for one authorization attempt, consumed by the code exchange.
pub struct PkceExchange {
    verifier: PkceCodeVerifier,
    state: CsrfToken,
    redirect_uri: String,
}

impl PkceExchange {
    /// Anti-forgery state the redirect must echo back.
    pub fn state(&self) -> &str {
        self.state.secret()
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }
}

/// Owns the token record: persists it, refreshes it ahead of expiry and tells
/// observers when the session ends.
pub struct TokenManager {
    auth: AuthConfig,
    store: Box<dyn TokenStore>,
    record: Mutex<Option<TokenRecord>>,
    state_tx: watch::Sender<AuthState>,
}

impl TokenManager {
    pub fn new(auth: AuthConfig, store: impl TokenStore + 'static) -> Self {
        let record = match store.load() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Ignoring unreadable token record: {:#}", e);
                None
            }
        };
        let initial = if record.is_some() {
            AuthState::LoggedIn
        } else {
            AuthState::LoggedOut
        };
        let (state_tx, _) = watch::channel(initial);

        Self {
            auth,
            store: Box::new(store),
            record: Mutex::new(record),
            state_tx,
        }
    }

    /// Manager over the file-backed store in the config directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            AuthConfig::from_config(config),
            Config::token_store()?,
        ))
    }

    /// Observe login/logout transitions.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.record.lock().await.is_some()
    }

    /// Snapshot of the current record (for status display).
    pub async fn record(&self) -> Option<TokenRecord> {
        self.record.lock().await.clone()
    }

    /// Start an authorization attempt: fresh verifier, S256 challenge and
    /// state, bound to `redirect_uri`.
    pub fn begin_authorization(&self, redirect_uri: &str) -> Result<(Url, PkceExchange)> {
        let client = build_client(&self.auth, Some(redirect_uri))?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .set_pkce_challenge(challenge)
            .url();

        tracing::debug!("Authorization URL: {}", url);
        Ok((
            url,
            PkceExchange {
                verifier,
                state,
                redirect_uri: redirect_uri.to_string(),
            },
        ))
    }

    /// Exchange an authorization code for a token pair and persist it.
    pub async fn exchange_code(
        &self,
        code: &str,
        returned_state: Option<&str>,
        exchange: PkceExchange,
    ) -> Result<()> {
        if returned_state != Some(exchange.state()) {
            bail!("Authorization state mismatch; ignoring callback");
        }

        let client = build_client(&self.auth, Some(&exchange.redirect_uri))?;
        tracing::info!("Exchanging authorization code for access token...");

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(exchange.verifier)
            .request_async(async_http_client)
            .await
            .map_err(describe_token_error)
            .context("Token exchange failed")?;

        let refresh_token = token_response
            .refresh_token()
            .context("Token response carried no refresh token")?;
        let record = TokenRecord::new(
            token_response.access_token().secret().to_string(),
            refresh_token.secret().to_string(),
            token_response.expires_in().map(|d| d.as_secs()),
        );

        let mut guard = self.record.lock().await;
        self.store.save(&record)?;
        *guard = Some(record);
        drop(guard);

        self.state_tx.send_replace(AuthState::LoggedIn);
        tracing::info!("Authentication successful");
        Ok(())
    }

    /// Current access token, refreshed first when inside the expiry margin.
    ///
    /// Makes at most one refresh attempt. If it fails the session is cleared
    /// and `None` is returned.
    pub async fn valid_access_token(&self) -> Option<String> {
        let mut guard = self.record.lock().await;
        let needs_refresh = guard.as_ref()?.needs_refresh(Utc::now());

        if needs_refresh {
            tracing::info!("Access token expiring, refreshing...");
            if let Err(e) = self.refresh_locked(&mut guard).await {
                tracing::warn!("Token refresh failed: {:#}", e);
                self.clear_locked(&mut guard);
                return None;
            }
        }

        guard.as_ref().map(|r| r.access_token.clone())
    }

    /// Refresh regardless of expiry (the server rejected the current token).
    pub async fn force_refresh(&self) -> Result<String> {
        let mut guard = self.record.lock().await;
        if guard.is_none() {
            bail!("Not logged in");
        }

        match self.refresh_locked(&mut guard).await {
            Ok(()) => guard
                .as_ref()
                .map(|r| r.access_token.clone())
                .context("Token record vanished during refresh"),
            Err(e) => {
                self.clear_locked(&mut guard);
                Err(e)
            }
        }
    }

    /// Clear both tokens and signal the logout.
    pub async fn logout(&self) {
        let mut guard = self.record.lock().await;
        self.clear_locked(&mut guard);
    }

    async fn refresh_locked(&self, guard: &mut MutexGuard<'_, Option<TokenRecord>>) -> Result<()> {
        let record = guard.as_mut().context("No refresh token available")?;
        let client = build_client(&self.auth, None)?;

        let token_response = client
            .exchange_refresh_token(&RefreshToken::new(record.refresh_token.clone()))
            .request_async(async_http_client)
            .await
            .map_err(describe_token_error)
            .context("Failed to refresh access token")?;

        record.apply_refresh(
            token_response.access_token().secret().to_string(),
            token_response
                .refresh_token()
                .map(|rt| rt.secret().to_string()),
            token_response.expires_in().map(|d| d.as_secs()),
        );

        if let Err(e) = self.store.save(record) {
            tracing::warn!("Refreshed token could not be persisted: {:#}", e);
        }
        tracing::info!("Access token refreshed");
        Ok(())
    }

    fn clear_locked(&self, guard: &mut MutexGuard<'_, Option<TokenRecord>>) {
        **guard = None;
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to remove stored tokens: {:#}", e);
        }
        self.state_tx.send_replace(AuthState::LoggedOut);
    }
}

/// Build the OAuth2 client. Spotify's PKCE flow is a public client, so the
/// client ID travels in the request body.
fn build_client(auth: &AuthConfig, redirect_uri: Option<&str>) -> Result<BasicClient> {
    let mut client = BasicClient::new(
        ClientId::new(auth.client_id.clone()),
        None,
        AuthUrl::new(auth.authorize_url.clone())?,
        Some(TokenUrl::new(auth.token_url.clone())?),
    )
    .set_auth_type(AuthType::RequestBody);

    if let Some(uri) = redirect_uri {
        client = client.set_redirect_uri(RedirectUrl::new(uri.to_string())?);
    }
    Ok(client)
}

fn describe_token_error<RE: std::error::Error + 'static>(
    err: RequestTokenError<RE, BasicErrorResponse>,
) -> anyhow::Error {
    match err {
        RequestTokenError::ServerResponse(resp) => match resp.error_description() {
            Some(desc) => anyhow!("{}: {}", resp.error(), desc),
            None => anyhow!("{}", resp.error()),
        },
        RequestTokenError::Request(e) => anyhow!("token request failed: {}", e),
        RequestTokenError::Parse(e, _) => anyhow!("unreadable token response: {}", e),
        RequestTokenError::Other(msg) => anyhow!(msg),
    }
}

/// Run one full authorization: listen for the redirect, hand the URL to
/// `on_url`, wait for the browser, exchange the code.
pub async fn authorize(
    manager: &TokenManager,
    config: &Config,
    on_url: impl FnOnce(&Url),
) -> Result<()> {
    let listener = CallbackListener::bind(&config.redirect_ports()).await?;
    let (url, exchange) = manager.begin_authorization(&listener.redirect_uri())?;
    on_url(&url);

    tracing::info!("Waiting for authorization redirect...");
    let params = tokio::time::timeout(AUTHORIZE_TIMEOUT, listener.wait())
        .await
        .context("Timed out waiting for the authorization redirect")??;

    let code = params.code()?;
    manager
        .exchange_code(code, params.state.as_deref(), exchange)
        .await
}

/// Try to open `url` in the default browser.
pub fn open_in_browser(url: &str) -> bool {
    match webbrowser::open(url) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to open browser: {}", e);
            false
        }
    }
}

/// Perform the interactive login flow
pub async fn login(force: bool, open_browser: bool) -> Result<()> {
    let config = Config::load()?;
    let manager = TokenManager::from_config(&config)?;

    if !force && manager.is_authenticated().await {
        if manager.valid_access_token().await.is_some() {
            println!("Already logged in. Use --force to re-authenticate.");
            return Ok(());
        }
        tracing::info!("Stored session could not be refreshed, starting a new login");
    }

    authorize(&manager, &config, |url| {
        println!();
        println!("To sign in, visit:");
        println!("  {}", url);
        println!();
        if open_browser && !open_in_browser(url.as_str()) {
            println!("Could not open a browser; copy the URL above into one.");
        }
    })
    .await?;

    println!("Login successful.");
    Ok(())
}

/// Clear stored credentials
pub async fn logout() -> Result<()> {
    let config = Config::load()?;
    let manager = TokenManager::from_config(&config)?;
    manager.logout().await;
    println!("Logged out.");
    Ok(())
}

/// Display current auth status
pub async fn status() -> Result<()> {
    let config = Config::load()?;
    let manager = TokenManager::from_config(&config)?;

    match manager.record().await {
        Some(record) => {
            if record.needs_refresh(Utc::now()) {
                println!("Access token: expired (will refresh on next call)");
            } else {
                println!("Access token: valid");
            }
            println!("  expires_at: {}", record.expires_at.to_rfc3339());
            println!("Refresh tok:  present");
        }
        None => {
            println!("Access token: none");
            println!("Refresh tok:  none");
            println!("\nRun 'miniplayer login' to authenticate.");
        }
    }
    println!("Client ID:    {}", config.client_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::MemoryTokenStore;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_config(server: &MockServer) -> AuthConfig {
        AuthConfig {
            client_id: "test-client".to_string(),
            authorize_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/api/token", server.uri()),
        }
    }

    fn record(expires_in_secs: i64) -> TokenRecord {
        TokenRecord {
            access_token: "old-access".to_string(),
            refresh_token: "old-refresh".to_string(),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        }
    }

    fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "access_token": access,
            "token_type": "Bearer",
            "expires_in": 3600,
            "scope": "user-read-playback-state"
        });
        if let Some(rt) = refresh {
            body["refresh_token"] = json!(rt);
        }
        body
    }

    fn query_value(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_authorization_url_carries_pkce_and_scopes() {
        let server = MockServer::start().await;
        let manager = TokenManager::new(auth_config(&server), MemoryTokenStore::default());

        let (url, exchange) = manager
            .begin_authorization("http://127.0.0.1:3000/callback")
            .unwrap();

        assert_eq!(url.path(), "/authorize");
        assert_eq!(query_value(&url, "client_id").as_deref(), Some("test-client"));
        assert_eq!(query_value(&url, "response_type").as_deref(), Some("code"));
        assert_eq!(
            query_value(&url, "redirect_uri").as_deref(),
            Some("http://127.0.0.1:3000/callback")
        );
        assert_eq!(
            query_value(&url, "code_challenge_method").as_deref(),
            Some("S256")
        );
        assert_eq!(query_value(&url, "state").as_deref(), Some(exchange.state()));

        let expected = PkceCodeChallenge::from_code_verifier_sha256(&exchange.verifier);
        assert_eq!(
            query_value(&url, "code_challenge").as_deref(),
            Some(expected.as_str())
        );

        let scope = query_value(&url, "scope").unwrap();
        for s in SCOPES {
            assert!(scope.split(' ').any(|x| x == *s), "missing scope {}", s);
        }
    }

    #[tokio::test]
    async fn test_each_attempt_gets_fresh_material() {
        let server = MockServer::start().await;
        let manager = TokenManager::new(auth_config(&server), MemoryTokenStore::default());
        let (_, a) = manager.begin_authorization("http://127.0.0.1:3000/callback").unwrap();
        let (_, b) = manager.begin_authorization("http://127.0.0.1:3000/callback").unwrap();
        assert_ne!(a.state(), b.state());
        assert_ne!(a.verifier.secret(), b.verifier.secret());
    }

    #[tokio::test]
    async fn test_exchange_code_persists_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier="))
            .and(body_string_contains("client_id=test-client"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("fresh", Some("refresh-1"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryTokenStore::default();
        let manager = TokenManager::new(auth_config(&server), store.clone());
        let mut rx = manager.subscribe();
        assert_eq!(*rx.borrow_and_update(), AuthState::LoggedOut);

        let (_, exchange) = manager
            .begin_authorization("http://127.0.0.1:3000/callback")
            .unwrap();
        let state = exchange.state().to_string();
        manager
            .exchange_code("the-code", Some(&state), exchange)
            .await
            .unwrap();

        let saved = store.current().unwrap();
        assert_eq!(saved.access_token, "fresh");
        assert_eq!(saved.refresh_token, "refresh-1");
        assert!(manager.is_authenticated().await);
        assert_eq!(*rx.borrow_and_update(), AuthState::LoggedIn);
    }

    #[tokio::test]
    async fn test_exchange_rejects_state_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", Some("y"))))
            .expect(0)
            .mount(&server)
            .await;

        let manager = TokenManager::new(auth_config(&server), MemoryTokenStore::default());
        let (_, exchange) = manager
            .begin_authorization("http://127.0.0.1:3000/callback")
            .unwrap();

        tokio_test::assert_err!(manager.exchange_code("code", Some("forged"), exchange).await);
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_exchange_requires_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("only-access", None)))
            .mount(&server)
            .await;

        let store = MemoryTokenStore::default();
        let manager = TokenManager::new(auth_config(&server), store.clone());
        let (_, exchange) = manager
            .begin_authorization("http://127.0.0.1:3000/callback")
            .unwrap();
        let state = exchange.state().to_string();

        assert!(manager.exchange_code("c", Some(&state), exchange).await.is_err());
        assert!(store.current().is_none());
    }

    #[tokio::test]
    async fn test_rejected_code_reports_server_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid authorization code"
            })))
            .mount(&server)
            .await;

        let manager = TokenManager::new(auth_config(&server), MemoryTokenStore::default());
        let (_, exchange) = manager
            .begin_authorization("http://127.0.0.1:3000/callback")
            .unwrap();
        let state = exchange.state().to_string();

        let err = manager
            .exchange_code("stale", Some(&state), exchange)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("invalid_grant: Invalid authorization code"));
    }

    #[test]
    fn test_transport_error_described() {
        let err: RequestTokenError<std::io::Error, BasicErrorResponse> =
            RequestTokenError::Request(std::io::Error::new(std::io::ErrorKind::Other, "refused"));
        assert_eq!(
            describe_token_error(err).to_string(),
            "token request failed: refused"
        );
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_exactly_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("new-access", None)))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryTokenStore::with_record(record(-60));
        let manager = TokenManager::new(auth_config(&server), store.clone());

        assert_eq!(
            manager.valid_access_token().await.as_deref(),
            Some("new-access")
        );
        // Second call sees a fresh token and does not hit the endpoint again.
        assert_eq!(
            manager.valid_access_token().await.as_deref(),
            Some("new-access")
        );

        let saved = store.current().unwrap();
        assert_eq!(saved.access_token, "new-access");
        assert_eq!(saved.refresh_token, "old-refresh");
    }

    #[tokio::test]
    async fn test_failed_refresh_logs_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Refresh token revoked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryTokenStore::with_record(record(-60));
        let manager = TokenManager::new(auth_config(&server), store.clone());
        let mut rx = manager.subscribe();
        assert_eq!(*rx.borrow_and_update(), AuthState::LoggedIn);

        assert!(manager.valid_access_token().await.is_none());
        assert!(store.current().is_none());
        assert!(!manager.is_authenticated().await);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AuthState::LoggedOut);

        // Logged out now: no further refresh attempts.
        assert!(manager.valid_access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let manager = TokenManager::new(
            auth_config(&server),
            MemoryTokenStore::with_record(record(3600)),
        );
        assert_eq!(
            manager.valid_access_token().await.as_deref(),
            Some("old-access")
        );
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let server = MockServer::start().await;
        let store = MemoryTokenStore::with_record(record(3600));
        let manager = TokenManager::new(auth_config(&server), store.clone());
        let mut rx = manager.subscribe();

        manager.logout().await;

        assert!(store.current().is_none());
        assert!(manager.record().await.is_none());
        assert!(manager.valid_access_token().await.is_none());
        assert_eq!(*rx.borrow_and_update(), AuthState::LoggedOut);
    }

    #[tokio::test]
    async fn test_force_refresh_without_session_fails() {
        let server = MockServer::start().await;
        let manager = TokenManager::new(auth_config(&server), MemoryTokenStore::default());
        tokio_test::assert_err!(manager.force_refresh().await);
    }

    #[tokio::test]
    async fn test_authorize_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/token"))
            .and(body_string_contains("code=browser-code"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(token_body("granted", Some("rt"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = Config {
            redirect_port: 0,
            fallback_port: 0,
            ..Config::default()
        };
        let store = MemoryTokenStore::default();
        let manager = TokenManager::new(auth_config(&server), store.clone());

        authorize(&manager, &config, |url| {
            // Play the browser: follow the redirect with the echoed state.
            let redirect = query_value(url, "redirect_uri").unwrap();
            let state = query_value(url, "state").unwrap();
            let target = format!("{}?code=browser-code&state={}", redirect, state);
            tokio::spawn(async move {
                let _ = reqwest::get(&target).await;
            });
        })
        .await
        .unwrap();

        assert_eq!(store.current().unwrap().access_token, "granted");
    }
}

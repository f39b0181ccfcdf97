//! Loopback listener that catches the OAuth redirect
//!
//! Binds 127.0.0.1 on the configured port, falling back to the next port in
//! the list when the first is taken. Only `/callback` is routed; everything
//! else gets a 404.

use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const CALLBACK_PATH: &str = "/callback";

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("no free port for the redirect listener (tried {0:?})")]
    NoPort(Vec<u16>),
    #[error("redirect listener I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("redirect listener stopped before the redirect arrived")]
    Closed,
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("redirect carried no authorization code")]
    MissingCode,
}

/// Query parameters delivered by the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    fn is_final(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// The authorization code, or why there is none.
    pub fn code(&self) -> Result<&str, CallbackError> {
        if let Some(ref error) = self.error {
            return Err(CallbackError::Denied(error.clone()));
        }
        self.code.as_deref().ok_or(CallbackError::MissingCode)
    }
}

/// Taken by the first request that carries a code or an error.
type ParamsSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Bind the first free port of `ports`. Port 0 asks the OS for any port.
    pub async fn bind(ports: &[u16]) -> Result<Self, CallbackError> {
        for &port in ports {
            match TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    tracing::info!("Callback listener on http://127.0.0.1:{}", port);
                    return Ok(Self { listener, port });
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    tracing::warn!("Port {} is already in use, trying the next one", port);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CallbackError::NoPort(ports.to_vec()))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI matching the bound port. Must also be registered with the
    /// Spotify application.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port(), CALLBACK_PATH)
    }

    /// Serve requests until one delivers a code or an error.
    pub async fn wait(self) -> Result<CallbackParams, CallbackError> {
        let (tx, rx) = oneshot::channel();
        let app = router(Arc::new(Mutex::new(Some(tx))));
        let mut server = tokio::spawn(async move { axum::serve(self.listener, app).await });

        let result = tokio::select! {
            params = rx => params.map_err(|_| CallbackError::Closed),
            served = &mut server => match served {
                Ok(Err(e)) => Err(e.into()),
                _ => Err(CallbackError::Closed),
            },
        };

        // Connections already accepted run on their own tasks and still get
        // their response; only the accept loop stops here.
        server.abort();
        result
    }
}

fn router(slot: ParamsSlot) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .with_state(slot)
}

async fn callback(
    State(slot): State<ParamsSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    if !params.is_final() {
        return Html(READY_PAGE.to_string());
    }

    let page = match params.error {
        Some(ref error) => failure_page(error),
        None => SUCCESS_PAGE.to_string(),
    };

    let sender = slot.lock().ok().and_then(|mut s| s.take());
    match sender {
        Some(sender) => {
            let _ = sender.send(params);
        }
        None => tracing::debug!("Ignoring repeated authorization redirect"),
    }
    Html(page)
}

fn failure_page(error: &str) -> String {
    let error = error.replace('<', "&lt;").replace('>', "&gt;");
    format!(
        "<html><head><title>Authentication Error</title></head><body>\
         <h2>Authentication Failed</h2><p>Error: {}</p>\
         <p>Please close this window and try again.</p></body></html>",
        error
    )
}

const SUCCESS_PAGE: &str = "<html><head><title>Success!</title></head><body>\
    <h2>Authentication Successful!</h2>\
    <p>You can now close this window and return to the miniplayer.</p></body></html>";

const READY_PAGE: &str = "<html><head><title>miniplayer</title></head><body>\
    <h2>Callback listener is running</h2></body></html>";

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn params(code: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: Some("s".to_string()),
            error: error.map(String::from),
        }
    }

    #[test]
    fn test_params_code() {
        let ok = params(Some("abc"), None);
        assert!(ok.is_final());
        assert_eq!(ok.code().unwrap(), "abc");

        let denied = params(None, Some("access_denied"));
        assert!(matches!(denied.code(), Err(CallbackError::Denied(ref e)) if e == "access_denied"));

        let bare = CallbackParams::default();
        assert!(!bare.is_final());
        assert!(matches!(bare.code(), Err(CallbackError::MissingCode)));
    }

    #[test]
    fn test_failure_page_escapes_error() {
        let page = failure_page("<script>");
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[tokio::test]
    async fn test_wait_returns_code_and_serves_page() {
        let listener = CallbackListener::bind(&[0]).await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.port());
        assert_eq!(listener.redirect_uri(), format!("{}/callback", base));

        let waiter = tokio::spawn(listener.wait());

        let not_found = reqwest::get(format!("{}/favicon.ico", base)).await.unwrap();
        assert_eq!(not_found.status(), reqwest::StatusCode::NOT_FOUND);

        let ready = reqwest::get(format!("{}/callback", base)).await.unwrap();
        assert!(ready.text().await.unwrap().contains("listener is running"));

        let done = reqwest::get(format!("{}/callback?code=c0de&state=st", base))
            .await
            .unwrap();
        assert!(done.text().await.unwrap().contains("Authentication Successful"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code.as_deref(), Some("c0de"));
        assert_eq!(params.state.as_deref(), Some("st"));
    }

    #[tokio::test]
    async fn test_denied_redirect_is_returned() {
        let listener = CallbackListener::bind(&[0]).await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.port());
        let waiter = tokio::spawn(listener.wait());

        let page = reqwest::get(format!("{}/callback?error=access_denied&state=s", base))
            .await
            .unwrap();
        assert!(page.text().await.unwrap().contains("Authentication Failed"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.error.as_deref(), Some("access_denied"));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_redirect() {
        let listener = CallbackListener::bind(&[0]).await.unwrap();
        let port = listener.port();
        let base = format!("http://127.0.0.1:{}", port);
        let waiter = tokio::spawn(listener.wait());

        // A browser preconnect: opened, never written to.
        let _idle = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();

        let done = reqwest::get(format!("{}/callback?code=c&state=s", base))
            .await
            .unwrap();
        assert!(done.status().is_success());

        let params = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("redirect should complete while another connection idles")
            .unwrap()
            .unwrap();
        assert_eq!(params.code.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_bind_falls_back_when_port_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let listener = CallbackListener::bind(&[taken_port, 0]).await.unwrap();
        assert_ne!(listener.port(), taken_port);
    }

    #[tokio::test]
    async fn test_bind_fails_when_all_ports_taken() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let result = CallbackListener::bind(&[taken_port]).await;
        assert!(matches!(result, Err(CallbackError::NoPort(_))));
    }
}

//! Authentication module for Spotify
//!
//! Implements the OAuth2 authorization code flow with PKCE, a loopback
//! listener that catches the redirect, and refresh-before-expiry token
//! management backed by a persisted token record.

pub mod callback;
pub mod oauth;
pub mod tokens;

pub use oauth::{login, logout, status, AuthState, TokenManager};
pub use tokens::FileTokenStore;

use crate::config::Config;

/// Scopes requested for miniplayer functionality.
pub const SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-read-recently-played",
    "user-library-read",
    "user-library-modify",
    "playlist-read-private",
    "playlist-read-collaborative",
    "streaming",
];

/// Spotify accounts service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth2 client ID (public client, no secret)
    pub client_id: String,
    /// Authorization endpoint
    pub authorize_url: String,
    /// Token endpoint (code exchange and refresh)
    pub token_url: String,
}

impl AuthConfig {
    pub fn from_config(config: &Config) -> Self {
        let base = config.accounts_base_url.trim_end_matches('/');
        Self {
            client_id: config.client_id.clone(),
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/api/token", base),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

//! Configuration and credential storage locations

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::auth::FileTokenStore;

/// Public client registered for the miniplayer. Override with your own app's
/// client ID in config.toml.
pub const DEFAULT_CLIENT_ID: &str = "5abd564556f34664b5e7dd625d345055";

const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
const DEFAULT_ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Spotify application client ID
    pub client_id: String,
    /// Loopback port for the OAuth redirect
    pub redirect_port: u16,
    /// Port tried when `redirect_port` is taken
    pub fallback_port: u16,
    /// Web API base URL
    pub api_base_url: String,
    /// Accounts service base URL (authorize and token endpoints)
    pub accounts_base_url: String,
    /// Seconds between playback polls in the TUI
    pub poll_interval_secs: u64,
    /// Market used for artist top tracks
    pub market: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_port: 3000,
            fallback_port: 3001,
            api_base_url: DEFAULT_API_BASE.to_string(),
            accounts_base_url: DEFAULT_ACCOUNTS_BASE.to_string(),
            poll_interval_secs: 5,
            market: "US".to_string(),
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "miniplayer", "miniplayer")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    pub fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Directory for the TUI log file
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        if config.client_id == DEFAULT_CLIENT_ID {
            tracing::debug!("Using the bundled client ID");
        }
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Ports the redirect listener tries, in order.
    pub fn redirect_ports(&self) -> Vec<u16> {
        if self.fallback_port == self.redirect_port {
            vec![self.redirect_port]
        } else {
            vec![self.redirect_port, self.fallback_port]
        }
    }

    /// File-backed token store in the config directory.
    pub fn token_store() -> Result<FileTokenStore> {
        Ok(FileTokenStore::new(Self::config_dir()?))
    }
}

/// Print resolved configuration and file locations. With `init`, write the
/// defaults first when no config file exists yet.
pub fn show(init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        if path.exists() {
            println!("Config file already exists, leaving it untouched.");
        } else {
            Config::default().save()?;
            println!("Wrote default configuration.");
        }
    }

    let config = Config::load()?;
    println!("Config file:  {}", path.display());
    println!("Token file:   {}", Config::token_store()?.path().display());
    println!("Log dir:      {}", Config::data_dir()?.display());
    println!();
    print!(
        "{}",
        toml::to_string_pretty(&config).context("Failed to serialize config")?
    );
    Ok(())
}

//! miniplayer - Lightweight terminal miniplayer for Spotify
//!
//! Signs in with OAuth PKCE and drives playback through the Web API, either
//! from one-shot commands or from a small full-screen player.

mod api;
mod auth;
mod config;
mod models;
mod player;
mod tui;

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use models::{parse_time, RepeatMode, SearchKind};

#[derive(Parser)]
#[command(name = "miniplayer")]
#[command(about = "Lightweight terminal miniplayer for Spotify", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to Spotify
    Login {
        /// Sign in again even if a session exists
        #[arg(short, long)]
        force: bool,

        /// Print the authorization URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },

    /// Log out and clear stored tokens
    Logout,

    /// Show current authentication status
    Status,

    /// Show what is playing
    Now,

    /// Resume playback, or start a context (album, playlist, artist)
    Play {
        /// Context URI, e.g. spotify:album:...
        #[arg(short, long)]
        context: Option<String>,

        /// Target device ID (from `devices`)
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Pause playback
    Pause,

    /// Toggle play/pause
    Toggle,

    /// Skip to the next track
    Next,

    /// Go back to the previous track
    Previous,

    /// Seek within the current track
    Seek {
        /// Position as m:ss or milliseconds
        position: String,
    },

    /// Set the volume
    Volume {
        /// Volume percent (0-100)
        percent: u8,
    },

    /// Set or toggle shuffle
    Shuffle {
        #[arg(value_enum)]
        state: Option<Switch>,
    },

    /// Set or cycle repeat mode
    Repeat {
        #[arg(value_enum)]
        mode: Option<RepeatMode>,
    },

    /// Save a track to your library (default: current track)
    Like {
        /// Track URI, link or ID
        track: Option<String>,
    },

    /// Remove a track from your library (default: current track)
    Unlike {
        /// Track URI, link or ID
        track: Option<String>,
    },

    /// List recently played tracks
    Recent {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Search the catalog
    Search {
        query: String,

        /// What to search for
        #[arg(short, long, value_enum, default_value = "track")]
        kind: SearchKind,

        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// List your playlists
    Playlists {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show a playlist and its tracks
    Playlist {
        id: String,

        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Show an album and its tracks
    Album { id: String },

    /// Show an artist and their top tracks
    Artist { id: String },

    /// List available playback devices
    Devices,

    /// Move playback to another device
    Transfer {
        device_id: String,

        /// Start playing on the new device
        #[arg(long)]
        play: bool,
    },

    /// Show the playback queue
    Queue,

    /// Add a track or episode to the queue
    Enqueue { uri: String },

    /// Show configuration and file locations
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Launch the terminal player
    Tui,
}

/// Install the tracing subscriber. The TUI owns the terminal, so its logs go
/// to a file in the data directory instead of stderr.
fn init_logging(verbose: bool, to_file: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if to_file {
        let dir = Config::data_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join("miniplayer.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, matches!(cli.command, Commands::Tui))?;

    match cli.command {
        Commands::Login { force, no_browser } => {
            tracing::info!("Starting authentication flow...");
            auth::login(force, !no_browser).await?;
        }
        Commands::Logout => {
            tracing::info!("Logging out...");
            auth::logout().await?;
        }
        Commands::Status => {
            auth::status().await?;
        }
        Commands::Now => {
            api::now_playing().await?;
        }
        Commands::Play { context, device } => {
            api::play(context.as_deref(), device.as_deref()).await?;
        }
        Commands::Pause => {
            api::pause().await?;
        }
        Commands::Toggle => {
            api::toggle().await?;
        }
        Commands::Next => {
            api::next().await?;
        }
        Commands::Previous => {
            api::previous().await?;
        }
        Commands::Seek { position } => {
            let ms = parse_time(&position)
                .with_context(|| format!("Invalid position '{}', use m:ss or ms", position))?;
            api::seek(ms).await?;
        }
        Commands::Volume { percent } => {
            api::volume(percent).await?;
        }
        Commands::Shuffle { state } => {
            api::shuffle(state.map(|s| matches!(s, Switch::On))).await?;
        }
        Commands::Repeat { mode } => {
            api::repeat(mode).await?;
        }
        Commands::Like { track } => {
            api::like(track.as_deref()).await?;
        }
        Commands::Unlike { track } => {
            api::unlike(track.as_deref()).await?;
        }
        Commands::Recent { limit } => {
            api::list_recent(limit).await?;
        }
        Commands::Search { query, kind, limit } => {
            tracing::info!("Searching for {}...", kind.as_str());
            api::search(&query, kind, limit).await?;
        }
        Commands::Playlists { limit } => {
            api::list_playlists(limit).await?;
        }
        Commands::Playlist { id, limit } => {
            api::show_playlist(&id, limit).await?;
        }
        Commands::Album { id } => {
            api::show_album(&id).await?;
        }
        Commands::Artist { id } => {
            api::show_artist(&id).await?;
        }
        Commands::Devices => {
            api::list_devices().await?;
        }
        Commands::Transfer { device_id, play } => {
            api::transfer(&device_id, play).await?;
        }
        Commands::Queue => {
            api::show_queue().await?;
        }
        Commands::Enqueue { uri } => {
            api::enqueue(&uri).await?;
        }
        Commands::Config { init } => {
            config::show(init)?;
        }
        Commands::Tui => {
            tui::run().await?;
        }
    }

    Ok(())
}

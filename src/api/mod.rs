//! Spotify Web API wrapper
//!
//! `client` holds the authenticated request path; the other modules add the
//! endpoint calls on top of it along with the CLI commands that print them.

mod browse;
pub mod client;
mod library;
mod player;

pub use browse::{search, show_album, show_artist};
pub use client::{ApiError, SpotifyClient};
pub use library::{like, list_playlists, list_recent, show_playlist, unlike};
pub use player::{
    enqueue, list_devices, next, now_playing, pause, play, previous, repeat, seek, show_queue,
    shuffle, toggle, transfer, volume,
};

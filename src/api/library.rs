//! Saved tracks, listening history, playlists and the user profile

use anyhow::{Context, Result};
use reqwest::Method;

use super::client::{ApiError, SpotifyClient};
use crate::models::{
    extract_track_id, format_time, Paging, PlayHistory, Playlist, PlaylistItem,
    SimplifiedPlaylist, Track, User,
};

impl SpotifyClient {
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get_required("/me", &[]).await
    }

    /// Whether the user has saved this track.
    pub async fn is_track_saved(&self, track_id: &str) -> Result<bool, ApiError> {
        let flags: Vec<bool> = self
            .get_required("/me/tracks/contains", &[("ids", track_id.to_string())])
            .await?;
        Ok(flags.first().copied().unwrap_or(false))
    }

    pub async fn save_track(&self, track_id: &str) -> Result<(), ApiError> {
        self.write(
            Method::PUT,
            "/me/tracks",
            &[("ids", track_id.to_string())],
            None,
        )
        .await
    }

    pub async fn remove_track(&self, track_id: &str) -> Result<(), ApiError> {
        self.write(
            Method::DELETE,
            "/me/tracks",
            &[("ids", track_id.to_string())],
            None,
        )
        .await
    }

    pub async fn recently_played(&self, limit: u32) -> Result<Vec<PlayHistory>, ApiError> {
        let page: Option<Paging<PlayHistory>> = self
            .get(
                "/me/player/recently-played",
                &[("limit", limit.clamp(1, 50).to_string())],
            )
            .await?;
        Ok(page.map(|p| p.items).unwrap_or_default())
    }

    /// The most recently played track, if any.
    pub async fn last_played(&self) -> Result<Option<Track>, ApiError> {
        Ok(self
            .recently_played(1)
            .await?
            .into_iter()
            .next()
            .map(|h| h.track))
    }

    pub async fn my_playlists(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<SimplifiedPlaylist>, ApiError> {
        self.get_required(
            "/me/playlists",
            &[
                ("limit", limit.clamp(1, 50).to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn playlist(&self, id: &str, fields: Option<&str>) -> Result<Playlist, ApiError> {
        let query: Vec<(&str, String)> = fields
            .map(|f| vec![("fields", f.to_string())])
            .unwrap_or_default();
        self.get_required(&format!("/playlists/{}", id), &query)
            .await
    }

    pub async fn playlist_tracks(
        &self,
        id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<PlaylistItem>, ApiError> {
        self.get_required(
            &format!("/playlists/{}/tracks", id),
            &[
                ("limit", limit.clamp(1, 100).to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }
}

/// Track id from an argument, or from whatever is playing.
async fn resolve_track(client: &SpotifyClient, track: Option<&str>) -> Result<(String, String)> {
    if let Some(arg) = track {
        let id = extract_track_id(arg).with_context(|| format!("Not a track: {}", arg))?;
        return Ok((id, arg.to_string()));
    }
    let track = client
        .currently_playing()
        .await
        .context("Failed to fetch the current track")?
        .and_then(|p| p.item)
        .context("Nothing is playing")?;
    let id = extract_track_id(&track.uri)
        .or(track.id.clone())
        .context("Current item has no track id")?;
    Ok((id, format!("{} - {}", track.name, track.artist_names())))
}

/// Save a track (the current one when `track` is `None`).
pub async fn like(track: Option<&str>) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let (id, label) = resolve_track(&client, track).await?;
    match client.save_track(&id).await {
        Ok(()) => println!("Liked: {}", label),
        Err(e) if e.is_inconclusive() => println!("Liked (unconfirmed): {}", label),
        Err(e) => return Err(e).context("Failed to like track"),
    }
    Ok(())
}

pub async fn unlike(track: Option<&str>) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let (id, label) = resolve_track(&client, track).await?;
    match client.remove_track(&id).await {
        Ok(()) => println!("Removed from library: {}", label),
        Err(e) if e.is_inconclusive() => {
            println!("Removed from library (unconfirmed): {}", label)
        }
        Err(e) => return Err(e).context("Failed to unlike track"),
    }
    Ok(())
}

pub async fn list_recent(limit: u32) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let history = client
        .recently_played(limit)
        .await
        .context("Failed to fetch recently played tracks")?;

    println!("\nRecently Played:");
    println!("{:-<60}", "");
    if history.is_empty() {
        println!("  (nothing played recently)");
        return Ok(());
    }
    for entry in &history {
        println!("{} - {}", entry.track.name, entry.track.artist_names());
        if let Some(ref at) = entry.played_at {
            println!("  played: {}", at);
        }
    }
    Ok(())
}

pub async fn list_playlists(limit: u32) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let page = client
        .my_playlists(limit, 0)
        .await
        .context("Failed to fetch playlists")?;

    println!("\nPlaylists:");
    println!("{:-<60}", "");
    if page.items.is_empty() {
        println!("  (no playlists found)");
        return Ok(());
    }
    for playlist in &page.items {
        let count = playlist.tracks.as_ref().map(|t| t.total).unwrap_or(0);
        println!("{} ({} tracks)", playlist.name, count);
        println!("  ID: {}", playlist.id);
    }
    if let Some(total) = page.total {
        if total as usize > page.items.len() {
            println!("\n  ... {} more", total as usize - page.items.len());
        }
    }
    Ok(())
}

pub async fn show_playlist(id: &str, limit: u32) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let playlist = client
        .playlist(id, Some("id,name,uri,description,owner"))
        .await
        .context("Failed to fetch playlist")?;
    let items = client
        .playlist_tracks(id, limit, 0)
        .await
        .context("Failed to fetch playlist tracks")?;

    println!("\n{}", playlist.name);
    if let Some(owner) = playlist.owner.as_ref().and_then(|o| o.display_name.as_deref()) {
        println!("  by {}", owner);
    }
    if let Some(desc) = playlist.description.as_deref().filter(|d| !d.is_empty()) {
        println!("  {}", desc);
    }
    println!("  URI: {}", playlist.uri);
    println!("{:-<60}", "");

    for (i, track) in items.items.iter().filter_map(|item| item.track.as_ref()).enumerate() {
        println!(
            "{:>3}. {} - {} [{}]",
            i + 1,
            track.name,
            track.artist_names(),
            format_time(track.duration_ms)
        );
    }
    Ok(())
}

//! Catalog lookups: search, albums and artists

use anyhow::{Context, Result};

use super::client::{ApiError, SpotifyClient};
use crate::config::Config;
use crate::models::{
    format_time, image_url, Album, Artist, ImageSize, Paging, SearchKind, SearchResults,
    TopTracks, Track,
};

impl SpotifyClient {
    pub async fn search(
        &self,
        query: &str,
        kinds: &[SearchKind],
        limit: u32,
        offset: u32,
    ) -> Result<SearchResults, ApiError> {
        let types = kinds
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(",");
        self.get_required(
            "/search",
            &[
                ("q", query.to_string()),
                ("type", types),
                ("limit", limit.clamp(1, 50).to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn album(&self, id: &str) -> Result<Album, ApiError> {
        self.get_required(&format!("/albums/{}", id), &[]).await
    }

    pub async fn album_tracks(
        &self,
        id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Paging<Track>, ApiError> {
        self.get_required(
            &format!("/albums/{}/tracks", id),
            &[
                ("limit", limit.clamp(1, 50).to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    pub async fn artist(&self, id: &str) -> Result<Artist, ApiError> {
        self.get_required(&format!("/artists/{}", id), &[]).await
    }

    pub async fn artist_top_tracks(&self, id: &str, market: &str) -> Result<Vec<Track>, ApiError> {
        let top: TopTracks = self
            .get_required(
                &format!("/artists/{}/top-tracks", id),
                &[("market", market.to_string())],
            )
            .await?;
        Ok(top.tracks)
    }
}

/// Search the catalog (prints to stdout).
pub async fn search(query: &str, kind: SearchKind, limit: u32) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let results = client
        .search(query, &[kind], limit, 0)
        .await
        .context("Search failed")?;

    println!("\nResults for \"{}\":", query);
    println!("{:-<60}", "");

    let lines = match kind {
        SearchKind::Track => page_lines(results.tracks, |t| {
            format!(
                "{} - {} [{}]\n  {}",
                t.name,
                t.artist_names(),
                format_time(t.duration_ms),
                t.uri
            )
        }),
        SearchKind::Album => page_lines(results.albums, |a| {
            let artists = a
                .artists
                .iter()
                .map(|x| x.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} - {}\n  {}", a.name, artists, a.uri.unwrap_or_default())
        }),
        SearchKind::Artist => page_lines(results.artists, |a| format!("{}\n  {}", a.name, a.uri)),
        SearchKind::Playlist => page_lines(results.playlists, |p| {
            let owner = p.owner.and_then(|o| o.display_name).unwrap_or_default();
            format!("{} ({})\n  {}", p.name, owner, p.uri)
        }),
    };

    if lines.is_empty() {
        println!("  (no results)");
    }
    for line in &lines {
        println!("{}", line);
    }
    Ok(())
}

/// Render the non-null entries of a search page.
fn page_lines<T>(page: Option<Paging<Option<T>>>, render: impl Fn(T) -> String) -> Vec<String> {
    page.map(|p| p.items.into_iter().flatten().map(render).collect())
        .unwrap_or_default()
}

pub async fn show_album(id: &str) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let album = client.album(id).await.context("Failed to fetch album")?;
    let tracks = client
        .album_tracks(id, 50, 0)
        .await
        .context("Failed to fetch album tracks")?;

    let artists = album
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    println!("\n{} - {}", album.name, artists);
    if let Some(ref date) = album.release_date {
        println!("  released: {}", date);
    }
    if let Some(ref label) = album.label {
        println!("  label: {}", label);
    }
    println!("  URI: {}", album.uri);
    if let Some(cover) = image_url(&album.images, ImageSize::Medium) {
        println!("  cover: {}", cover);
    }
    println!("{:-<60}", "");
    for (i, track) in tracks.items.iter().enumerate() {
        println!(
            "{:>3}. {} [{}]",
            i + 1,
            track.name,
            format_time(track.duration_ms)
        );
    }
    Ok(())
}

pub async fn show_artist(id: &str) -> Result<()> {
    let market = Config::load()?.market;
    let client = SpotifyClient::connect().await?;
    let artist = client.artist(id).await.context("Failed to fetch artist")?;
    let top = client
        .artist_top_tracks(id, &market)
        .await
        .context("Failed to fetch top tracks")?;

    println!("\n{}", artist.name);
    if !artist.genres.is_empty() {
        println!("  genres: {}", artist.genres.join(", "));
    }
    if let Some(ref followers) = artist.followers {
        println!("  followers: {}", followers.total);
    }
    println!("  URI: {}", artist.uri);
    if let Some(picture) = image_url(&artist.images, ImageSize::Small) {
        println!("  image: {}", picture);
    }
    println!("\nTop tracks:");
    println!("{:-<60}", "");
    for (i, track) in top.iter().enumerate() {
        println!(
            "{:>3}. {} [{}]",
            i + 1,
            track.name,
            format_time(track.duration_ms)
        );
    }
    Ok(())
}

//! Data models for Spotify entities

mod catalog;
mod playback;

pub use catalog::*;
pub use playback::*;

use serde::{Deserialize, Serialize};

/// Cover art image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    Small,
    Medium,
    Large,
}

/// Pick an image by size. Spotify lists images largest first.
pub fn image_url(images: &[Image], size: ImageSize) -> Option<&str> {
    let image = match size {
        ImageSize::Small if images.len() > 2 => images.get(2),
        ImageSize::Large => images.first(),
        _ => images.get(1).or_else(|| images.first()),
    };
    image.map(|i| i.url.as_str())
}

/// Format milliseconds as `m:ss`.
pub fn format_time(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    format!("{}:{:02}", minutes, seconds)
}

/// Parse `m:ss`, `h:mm:ss` or a plain millisecond count.
pub fn parse_time(input: &str) -> Option<u64> {
    let input = input.trim();
    if !input.contains(':') {
        return input.parse().ok();
    }
    let mut total: u64 = 0;
    for part in input.split(':') {
        let value: u64 = part.parse().ok()?;
        total = total.checked_mul(60)?.checked_add(value)?;
    }
    Some(total * 1000)
}

/// Extract a track ID from a `spotify:track:<id>` URI, an
/// `open.spotify.com/track/<id>` link, or a bare 22-character ID.
pub fn extract_track_id(uri: &str) -> Option<String> {
    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    if let Some(rest) = uri.strip_prefix("spotify:track:") {
        return Some(rest.to_string());
    }
    if uri.starts_with("spotify:") {
        return uri.rsplit(':').next().map(String::from);
    }
    if let Some((_, rest)) = uri.split_once("/track/") {
        let id = rest.split(['?', '/', '#']).next().unwrap_or_default();
        return (!id.is_empty()).then(|| id.to_string());
    }
    if uri.len() == 22 && uri.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some(uri.to_string());
    }
    None
}

//! Playback-related models

use serde::{Deserialize, Serialize};

use super::{ArtistRef, ImageSize, SimplifiedAlbum};

/// Repeat mode as the player API names it
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Context,
    Track,
}

impl RepeatMode {
    /// Next mode in the cycle off -> context -> track -> off.
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Context,
            RepeatMode::Context => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::Context => "context",
            RepeatMode::Track => "track",
        }
    }
}

/// Playback device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_restricted: bool,
    pub volume_percent: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub devices: Vec<Device>,
}

/// Full track object (album is absent in album track listings)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<String>,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    pub album: Option<SimplifiedAlbum>,
    #[serde(default)]
    pub explicit: bool,
}

impl Track {
    pub fn artist_names(&self) -> String {
        self.artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn image_url(&self, size: ImageSize) -> Option<&str> {
        self.album
            .as_ref()
            .and_then(|album| super::image_url(&album.images, size))
    }
}

/// Response of `GET /me/player`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentPlayback {
    pub device: Option<Device>,
    #[serde(default)]
    pub shuffle_state: bool,
    #[serde(default)]
    pub repeat_state: RepeatMode,
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    pub item: Option<Track>,
    pub currently_playing_type: Option<String>,
}

/// Response of `GET /me/player/currently-playing`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentlyPlaying {
    pub progress_ms: Option<u64>,
    #[serde(default)]
    pub is_playing: bool,
    pub item: Option<Track>,
}

/// Response of `GET /me/player/queue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Queue {
    pub currently_playing: Option<Track>,
    #[serde(default)]
    pub queue: Vec<Track>,
}

/// Local view of what is playing, rebuilt wholesale from each poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub track_id: Option<String>,
    pub track_uri: Option<String>,
    pub title: String,
    pub artists: Vec<String>,
    pub album_art: Option<String>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub shuffle: bool,
    pub repeat: RepeatMode,
    pub device_name: Option<String>,
}

impl PlaybackSnapshot {
    /// Snapshot of a track that is not currently playing (e.g. the most
    /// recently played one).
    pub fn from_track(track: &Track) -> Self {
        Self {
            track_id: track.id.clone(),
            track_uri: Some(track.uri.clone()),
            title: track.name.clone(),
            artists: track.artists.iter().map(|a| a.name.clone()).collect(),
            album_art: track.image_url(ImageSize::Large).map(String::from),
            duration_ms: track.duration_ms,
            ..Self::default()
        }
    }

    pub fn artists_line(&self) -> String {
        self.artists.join(", ")
    }

    /// Track identifier usable with the library endpoints.
    pub fn library_id(&self) -> Option<String> {
        self.track_uri
            .as_deref()
            .and_then(super::extract_track_id)
            .or_else(|| self.track_id.clone())
    }
}

impl From<&CurrentPlayback> for PlaybackSnapshot {
    fn from(playback: &CurrentPlayback) -> Self {
        let mut snapshot = match playback.item {
            Some(ref track) => Self::from_track(track),
            None => Self::default(),
        };
        snapshot.is_playing = playback.is_playing;
        snapshot.progress_ms = playback.progress_ms.unwrap_or(0);
        snapshot.shuffle = playback.shuffle_state;
        snapshot.repeat = playback.repeat_state;
        snapshot.device_name = playback.device.as_ref().map(|d| d.name.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repeat_cycle_order() {
        let mut mode = RepeatMode::Off;
        let mut seen = Vec::new();
        for _ in 0..4 {
            mode = mode.next();
            seen.push(mode);
        }
        assert_eq!(
            seen,
            vec![
                RepeatMode::Context,
                RepeatMode::Track,
                RepeatMode::Off,
                RepeatMode::Context
            ]
        );
    }

    #[test]
    fn test_repeat_mode_wire_names() {
        let mode: RepeatMode = serde_json::from_value(json!("context")).unwrap();
        assert_eq!(mode, RepeatMode::Context);
        assert_eq!(RepeatMode::Track.as_str(), "track");
    }

    #[test]
    fn test_snapshot_from_playback() {
        let playback: CurrentPlayback = serde_json::from_value(json!({
            "device": {"id": "d1", "name": "Laptop", "type": "Computer", "is_active": true, "volume_percent": 40},
            "shuffle_state": true,
            "repeat_state": "track",
            "progress_ms": 42000,
            "is_playing": true,
            "item": {
                "id": "4uLU6hMCjMI75M1A2tKUQC",
                "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                "name": "Never Gonna Give You Up",
                "duration_ms": 213000,
                "artists": [{"id": "a1", "name": "Rick Astley"}],
                "album": {"id": "al", "name": "Whenever You Need Somebody", "images": [
                    {"url": "https://i.scdn.co/large", "width": 640, "height": 640},
                    {"url": "https://i.scdn.co/medium", "width": 300, "height": 300}
                ]}
            },
            "currently_playing_type": "track"
        }))
        .unwrap();

        let snapshot = PlaybackSnapshot::from(&playback);
        assert_eq!(snapshot.title, "Never Gonna Give You Up");
        assert_eq!(snapshot.artists_line(), "Rick Astley");
        assert_eq!(snapshot.album_art.as_deref(), Some("https://i.scdn.co/large"));
        assert!(snapshot.is_playing);
        assert!(snapshot.shuffle);
        assert_eq!(snapshot.repeat, RepeatMode::Track);
        assert_eq!(snapshot.progress_ms, 42000);
        assert_eq!(snapshot.duration_ms, 213000);
        assert_eq!(snapshot.device_name.as_deref(), Some("Laptop"));
        assert_eq!(
            snapshot.library_id().as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
    }

    #[test]
    fn test_snapshot_without_item() {
        let playback: CurrentPlayback =
            serde_json::from_value(json!({"is_playing": false, "repeat_state": "off"})).unwrap();
        let snapshot = PlaybackSnapshot::from(&playback);
        assert!(snapshot.track_id.is_none());
        assert!(snapshot.library_id().is_none());
        assert_eq!(snapshot.duration_ms, 0);
    }
}

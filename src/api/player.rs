//! Player endpoints (/me/player/*)

use anyhow::{bail, Context, Result};
use reqwest::Method;
use serde_json::json;

use super::client::{ApiError, SpotifyClient};
use crate::models::{
    format_time, CurrentPlayback, CurrentlyPlaying, Device, Devices, PlaybackSnapshot, Queue,
    RepeatMode,
};

fn device_query(device_id: Option<&str>) -> Vec<(&'static str, String)> {
    device_id
        .map(|id| vec![("device_id", id.to_string())])
        .unwrap_or_default()
}

/// 204 and 404 both mean "nothing is playing" for the playback reads.
fn none_if_not_found<T>(result: Result<Option<T>, ApiError>) -> Result<Option<T>, ApiError> {
    match result {
        Err(ApiError::Http { status: 404, .. }) => Ok(None),
        other => other,
    }
}

impl SpotifyClient {
    /// Full playback state, or `None` when no device is active.
    pub async fn current_playback(&self) -> Result<Option<CurrentPlayback>, ApiError> {
        none_if_not_found(self.get("/me/player", &[]).await)
    }

    pub async fn currently_playing(&self) -> Result<Option<CurrentlyPlaying>, ApiError> {
        none_if_not_found(self.get("/me/player/currently-playing", &[]).await)
    }

    pub async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        let devices: Option<Devices> = self.get("/me/player/devices", &[]).await?;
        Ok(devices.map(|d| d.devices).unwrap_or_default())
    }

    pub async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), ApiError> {
        let body = json!({ "device_ids": [device_id], "play": play });
        self.write(Method::PUT, "/me/player", &[], Some(&body)).await
    }

    /// Resume playback, or start `context_uri` when given.
    pub async fn play(
        &self,
        context_uri: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let body = match context_uri {
            Some(uri) => json!({ "context_uri": uri }),
            None => json!({}),
        };
        self.write(
            Method::PUT,
            "/me/player/play",
            &device_query(device_id),
            Some(&body),
        )
        .await
    }

    pub async fn pause(&self, device_id: Option<&str>) -> Result<(), ApiError> {
        self.write(Method::PUT, "/me/player/pause", &device_query(device_id), None)
            .await
    }

    pub async fn next_track(&self) -> Result<(), ApiError> {
        self.write(Method::POST, "/me/player/next", &[], None).await
    }

    pub async fn previous_track(&self) -> Result<(), ApiError> {
        self.write(Method::POST, "/me/player/previous", &[], None)
            .await
    }

    pub async fn seek(&self, position_ms: u64, device_id: Option<&str>) -> Result<(), ApiError> {
        let mut query = vec![("position_ms", position_ms.to_string())];
        query.extend(device_query(device_id));
        self.write(Method::PUT, "/me/player/seek", &query, None).await
    }

    pub async fn set_volume(&self, percent: u8, device_id: Option<&str>) -> Result<(), ApiError> {
        let mut query = vec![("volume_percent", percent.min(100).to_string())];
        query.extend(device_query(device_id));
        self.write(Method::PUT, "/me/player/volume", &query, None).await
    }

    pub async fn set_shuffle(&self, state: bool, device_id: Option<&str>) -> Result<(), ApiError> {
        let mut query = vec![("state", state.to_string())];
        query.extend(device_query(device_id));
        self.write(Method::PUT, "/me/player/shuffle", &query, None)
            .await
    }

    pub async fn set_repeat(
        &self,
        mode: RepeatMode,
        device_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut query = vec![("state", mode.as_str().to_string())];
        query.extend(device_query(device_id));
        self.write(Method::PUT, "/me/player/repeat", &query, None).await
    }

    pub async fn queue(&self) -> Result<Option<Queue>, ApiError> {
        self.get("/me/player/queue", &[]).await
    }

    pub async fn add_to_queue(&self, uri: &str) -> Result<(), ApiError> {
        self.write(
            Method::POST,
            "/me/player/queue",
            &[("uri", uri.to_string())],
            None,
        )
        .await
    }
}

/// Treat an inconclusive write as applied; anything else is an error.
fn write_outcome(result: Result<(), ApiError>, done: &str) -> Result<()> {
    match result {
        Ok(()) => println!("{}", done),
        Err(e) if e.is_inconclusive() => {
            tracing::debug!("Unreadable response body: {}", e);
            println!("{} (unconfirmed, check with `miniplayer now`)", done);
        }
        Err(e) => bail!(e.user_message()),
    }
    Ok(())
}

/// Print what is playing.
pub async fn now_playing() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let playback = client
        .current_playback()
        .await
        .context("Failed to fetch playback state")?;

    let Some(playback) = playback else {
        println!("Nothing is playing.");
        return Ok(());
    };
    let snapshot = PlaybackSnapshot::from(&playback);
    if snapshot.track_id.is_none() && snapshot.title.is_empty() {
        println!("Nothing is playing.");
        return Ok(());
    }

    println!();
    println!(
        "{} {}",
        if snapshot.is_playing { "▶" } else { "⏸" },
        snapshot.title
    );
    println!("  {}", snapshot.artists_line());
    if let Some(album) = playback.item.as_ref().and_then(|t| t.album.as_ref()) {
        println!("  {}", album.name);
    }
    println!(
        "  {} / {}",
        format_time(snapshot.progress_ms),
        format_time(snapshot.duration_ms)
    );
    println!(
        "  shuffle: {}  repeat: {}  device: {}",
        if snapshot.shuffle { "on" } else { "off" },
        snapshot.repeat.as_str(),
        snapshot.device_name.as_deref().unwrap_or("(none)")
    );
    if let Some(ref art) = snapshot.album_art {
        println!("  art: {}", art);
    }
    Ok(())
}

pub async fn play(context: Option<&str>, device: Option<&str>) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(client.play(context, device).await, "Playing.")
}

pub async fn pause() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(client.pause(None).await, "Paused.")
}

/// Pause when playing, resume otherwise.
pub async fn toggle() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let playing = client
        .current_playback()
        .await
        .context("Failed to fetch playback state")?
        .map(|p| p.is_playing)
        .unwrap_or(false);

    if playing {
        write_outcome(client.pause(None).await, "Paused.")
    } else {
        write_outcome(client.play(None, None).await, "Playing.")
    }
}

pub async fn next() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(client.next_track().await, "Skipped to next track.")
}

pub async fn previous() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(client.previous_track().await, "Back to previous track.")
}

pub async fn seek(position_ms: u64) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(
        client.seek(position_ms, None).await,
        &format!("Seeked to {}.", format_time(position_ms)),
    )
}

pub async fn volume(percent: u8) -> Result<()> {
    if percent > 100 {
        bail!("Volume must be between 0 and 100");
    }
    let client = SpotifyClient::connect().await?;
    write_outcome(
        client.set_volume(percent, None).await,
        &format!("Volume set to {}%.", percent),
    )
}

/// Set shuffle, or flip it when `state` is `None`.
pub async fn shuffle(state: Option<bool>) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let state = match state {
        Some(s) => s,
        None => !client
            .current_playback()
            .await
            .context("Failed to fetch playback state")?
            .map(|p| p.shuffle_state)
            .unwrap_or(false),
    };
    write_outcome(
        client.set_shuffle(state, None).await,
        &format!("Shuffle {}.", if state { "on" } else { "off" }),
    )
}

/// Set repeat, or advance it one step when `mode` is `None`.
pub async fn repeat(mode: Option<RepeatMode>) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let mode = match mode {
        Some(m) => m,
        None => client
            .current_playback()
            .await
            .context("Failed to fetch playback state")?
            .map(|p| p.repeat_state)
            .unwrap_or_default()
            .next(),
    };
    write_outcome(
        client.set_repeat(mode, None).await,
        &format!("Repeat {}.", mode.as_str()),
    )
}

pub async fn list_devices() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let devices = client.devices().await.context("Failed to list devices")?;

    println!("\nDevices:");
    println!("{:-<60}", "");
    if devices.is_empty() {
        println!("  (no devices found, open Spotify on a device first)");
        return Ok(());
    }
    for device in &devices {
        println!(
            "{} {:<28} {:<12} {}",
            if device.is_active { "*" } else { " " },
            device.name,
            device.device_type,
            device.id.as_deref().unwrap_or("(restricted)")
        );
        if let Some(volume) = device.volume_percent {
            println!("    volume: {}%", volume);
        }
    }
    Ok(())
}

pub async fn transfer(device_id: &str, play: bool) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(
        client.transfer_playback(device_id, play).await,
        "Playback transferred.",
    )
}

pub async fn show_queue() -> Result<()> {
    let client = SpotifyClient::connect().await?;
    let queue = client.queue().await.context("Failed to fetch queue")?;

    let Some(queue) = queue else {
        println!("Queue is empty.");
        return Ok(());
    };
    if let Some(ref current) = queue.currently_playing {
        println!("\nNow: {} - {}", current.name, current.artist_names());
    }
    println!("\nUp next:");
    println!("{:-<60}", "");
    if queue.queue.is_empty() {
        println!("  (nothing queued)");
    }
    for (i, track) in queue.queue.iter().enumerate() {
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

pub async fn enqueue(uri: &str) -> Result<()> {
    let client = SpotifyClient::connect().await?;
    write_outcome(client.add_to_queue(uri).await, "Added to queue.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::test_support::client_for;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_current_playback_none_on_204_and_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"status": 404, "message": "Not found"}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, "t", 3600);
        assert!(client.current_playback().await.unwrap().is_none());
        assert!(client.currently_playing().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_endpoints_accept_204() {
        let server = MockServer::start().await;
        for (verb, route) in [
            ("PUT", "/v1/me/player/play"),
            ("PUT", "/v1/me/player/pause"),
            ("POST", "/v1/me/player/next"),
            ("POST", "/v1/me/player/previous"),
            ("PUT", "/v1/me/player/seek"),
            ("PUT", "/v1/me/player/volume"),
            ("PUT", "/v1/me/player/shuffle"),
            ("PUT", "/v1/me/player/repeat"),
            ("PUT", "/v1/me/player"),
            ("POST", "/v1/me/player/queue"),
        ] {
            Mock::given(method(verb))
                .and(path(route))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = client_for(&server, "t", 3600);
        client.play(None, None).await.unwrap();
        client.pause(None).await.unwrap();
        client.next_track().await.unwrap();
        client.previous_track().await.unwrap();
        client.seek(1000, None).await.unwrap();
        client.set_volume(50, None).await.unwrap();
        client.set_shuffle(true, None).await.unwrap();
        client.set_repeat(RepeatMode::Context, None).await.unwrap();
        client.transfer_playback("dev", false).await.unwrap();
        client.add_to_queue("spotify:track:x").await.unwrap();
    }

    #[tokio::test]
    async fn test_play_with_context_and_device() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/play"))
            .and(query_param("device_id", "dev-1"))
            .and(body_json(json!({"context_uri": "spotify:album:abc"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "t", 3600);
        client
            .play(Some("spotify:album:abc"), Some("dev-1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_repeat_and_shuffle_query() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/repeat"))
            .and(query_param("state", "track"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/shuffle"))
            .and(query_param("state", "false"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "t", 3600);
        client.set_repeat(RepeatMode::Track, None).await.unwrap();
        client.set_shuffle(false, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_transfer_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player"))
            .and(body_json(json!({"device_ids": ["dev-2"], "play": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, "t", 3600);
        client.transfer_playback("dev-2", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_devices_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "devices": [
                    {"id": "d1", "name": "Laptop", "type": "Computer", "is_active": true, "volume_percent": 70},
                    {"id": null, "name": "Speaker", "type": "Speaker", "is_restricted": true}
                ]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, "t", 3600);
        let devices = client.devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_active);
        assert_eq!(devices[0].volume_percent, Some(70));
        assert!(devices[1].id.is_none());
    }

    #[test]
    fn test_inconclusive_write_is_reported_as_done() {
        let err = ApiError::MalformedBody {
            status: 200,
            source: serde_json::from_str::<serde_json::Value>("nope").unwrap_err(),
        };
        assert!(write_outcome(Err(err), "Playing.").is_ok());

        let err = ApiError::Http {
            status: 404,
            message: "Device not found".to_string(),
        };
        let msg = write_outcome(Err(err), "Playing.").unwrap_err().to_string();
        assert_eq!(msg, "No active Spotify device found");
    }
}

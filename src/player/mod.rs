//! Playback controller
//!
//! Holds the local view of what is playing and reconciles it with the
//! service. Reads come from periodic polls; user commands update the local
//! state first, fire the remote call, then ask the caller for a confirmation
//! read through a [`Followup`].

use std::time::{Duration, Instant};

use crate::api::{ApiError, SpotifyClient};
use crate::models::{PlaybackSnapshot, Track};

/// Delays used by the controller.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Pause between retry attempts of a playback command
    pub retry_delay: Duration,
    /// Confirmation poll after play/pause
    pub toggle_confirm: Duration,
    /// Confirmation poll after next/previous
    pub skip_confirm: Duration,
    /// Verification read after an inconclusive like/unlike
    pub like_verify: Duration,
    /// How long a notice stays visible
    pub notice_ttl: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            toggle_confirm: Duration::from_millis(1500),
            skip_confirm: Duration::from_secs(2),
            like_verify: Duration::from_secs(2),
            notice_ttl: Duration::from_secs(4),
        }
    }
}

const TOGGLE_RETRIES: u32 = 2;
const SKIP_RETRIES: u32 = 1;
const TICK_MS: u64 = 1000;
const DEFAULT_VOLUME: u8 = 50;

/// Work the caller should schedule after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Re-read playback state after `after`
    Poll { after: Duration },
    /// Re-read the saved status of `track_id` after `after`
    VerifyLike {
        track_id: String,
        previously_liked: bool,
        after: Duration,
    },
}

impl Followup {
    pub fn delay(&self) -> Duration {
        match self {
            Followup::Poll { after } | Followup::VerifyLike { after, .. } => *after,
        }
    }
}

#[derive(Debug, Clone)]
struct Notice {
    text: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Play,
    Pause,
    Next,
    Previous,
}

pub struct PlayerController {
    client: SpotifyClient,
    timing: Timing,
    snapshot: PlaybackSnapshot,
    liked: bool,
    volume: Option<u8>,
    /// True when the last poll found an active playback session
    active: bool,
    notice: Option<Notice>,
    premium_notice: Option<String>,
}

impl PlayerController {
    pub fn new(client: SpotifyClient) -> Self {
        Self::with_timing(client, Timing::default())
    }

    pub fn with_timing(client: SpotifyClient, timing: Timing) -> Self {
        Self {
            client,
            timing,
            snapshot: PlaybackSnapshot::default(),
            liked: false,
            volume: None,
            active: false,
            notice: None,
            premium_notice: None,
        }
    }

    pub fn snapshot(&self) -> &PlaybackSnapshot {
        &self.snapshot
    }

    pub fn is_liked(&self) -> bool {
        self.liked
    }

    pub fn volume(&self) -> Option<u8> {
        self.volume
    }

    /// Whether a device is currently holding a playback session.
    pub fn has_active_device(&self) -> bool {
        self.active
    }

    /// Notice to display at `now`. Transient notices win over the persistent
    /// premium notice while they last.
    pub fn notice(&self, now: Instant) -> Option<&str> {
        self.notice
            .as_ref()
            .filter(|n| now < n.expires_at)
            .map(|n| n.text.as_str())
            .or(self.premium_notice.as_deref())
    }

    /// Forget everything about the previous session.
    pub fn reset(&mut self) {
        self.snapshot = PlaybackSnapshot::default();
        self.liked = false;
        self.volume = None;
        self.active = false;
        self.notice = None;
        self.premium_notice = None;
    }

    fn show_notice(&mut self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("Notice: {}", text);
        self.notice = Some(Notice {
            text,
            expires_at: Instant::now() + self.timing.notice_ttl,
        });
    }

    /// Check premium status once, then load the initial state.
    pub async fn init(&mut self) {
        match self.client.current_user().await {
            Ok(user) if !user.is_premium() => {
                tracing::warn!(
                    "Account {} is not premium, playback control unavailable",
                    user.id
                );
                self.premium_notice =
                    Some("Spotify Premium is required to control playback".to_string());
            }
            Ok(user) => tracing::debug!("Premium account {}", user.id),
            Err(e) => tracing::warn!("Could not read user profile: {}", e),
        }
        self.poll().await;
    }

    /// Rebuild the snapshot from the service. Errors skip the cycle.
    pub async fn poll(&mut self) {
        let playback = match self.client.current_playback().await {
            Ok(playback) => playback,
            Err(e) => {
                tracing::debug!("Skipping poll: {}", e);
                return;
            }
        };

        match playback {
            Some(ref pb) if pb.item.is_some() => {
                self.active = true;
                self.volume = pb.device.as_ref().and_then(|d| d.volume_percent);
                self.replace_snapshot(PlaybackSnapshot::from(pb)).await;
            }
            _ => {
                self.active = playback.is_some();
                self.show_last_played().await;
            }
        }
    }

    /// Nothing is playing: show the most recent track, paused at zero.
    async fn show_last_played(&mut self) {
        match self.client.last_played().await {
            Ok(Some(track)) => self.replace_snapshot(idle_snapshot(&track)).await,
            Ok(None) => {
                self.snapshot = PlaybackSnapshot::default();
                self.liked = false;
            }
            Err(e) => {
                tracing::debug!("Could not load recently played: {}", e);
                self.snapshot.is_playing = false;
            }
        }
    }

    async fn replace_snapshot(&mut self, snapshot: PlaybackSnapshot) {
        let changed = snapshot.library_id() != self.snapshot.library_id();
        self.snapshot = snapshot;
        if changed {
            self.refresh_liked().await;
        }
    }

    async fn refresh_liked(&mut self) {
        self.liked = match self.snapshot.library_id() {
            Some(id) => self.read_saved(&id).await,
            None => false,
        };
    }

    /// Saved status; a failed read counts as not saved.
    async fn read_saved(&self, track_id: &str) -> bool {
        match self.client.is_track_saved(track_id).await {
            Ok(saved) => saved,
            Err(e) => {
                tracing::debug!("Saved-status read failed for {}: {}", track_id, e);
                false
            }
        }
    }

    /// Advance local progress by one second, never past the duration.
    pub fn tick(&mut self) {
        if self.snapshot.is_playing && self.snapshot.duration_ms > 0 {
            self.snapshot.progress_ms =
                (self.snapshot.progress_ms + TICK_MS).min(self.snapshot.duration_ms);
        }
    }

    pub async fn toggle_play_pause(&mut self) -> Option<Followup> {
        let was_playing = self.snapshot.is_playing;
        self.snapshot.is_playing = !was_playing;

        let command = if was_playing {
            Command::Pause
        } else {
            Command::Play
        };
        match self.send_with_retries(command, TOGGLE_RETRIES).await {
            Ok(()) => {}
            Err(e) if e.is_inconclusive() => {
                tracing::debug!("{:?} response unreadable, confirming by poll", command);
            }
            Err(e) => {
                self.snapshot.is_playing = was_playing;
                if !e.is_auth() {
                    self.show_notice(e.user_message());
                }
                return None;
            }
        }
        Some(Followup::Poll {
            after: self.timing.toggle_confirm,
        })
    }

    pub async fn next(&mut self) -> Option<Followup> {
        self.skip(Command::Next, "Failed to skip track").await
    }

    pub async fn previous(&mut self) -> Option<Followup> {
        self.skip(Command::Previous, "Failed to go to previous track")
            .await
    }

    async fn skip(&mut self, command: Command, failure: &str) -> Option<Followup> {
        let progress = self.snapshot.progress_ms;
        self.snapshot.progress_ms = 0;

        match self.send_with_retries(command, SKIP_RETRIES).await {
            Ok(()) => {}
            Err(e) if e.is_inconclusive() => {
                tracing::debug!("{:?} response unreadable, confirming by poll", command);
            }
            Err(e) => {
                tracing::warn!("{:?} failed: {}", command, e);
                self.snapshot.progress_ms = progress;
                if !e.is_auth() {
                    self.show_notice(failure);
                }
                return None;
            }
        }
        Some(Followup::Poll {
            after: self.timing.skip_confirm,
        })
    }

    async fn send(&self, command: Command) -> Result<(), ApiError> {
        match command {
            Command::Play => self.client.play(None, None).await,
            Command::Pause => self.client.pause(None).await,
            Command::Next => self.client.next_track().await,
            Command::Previous => self.client.previous_track().await,
        }
    }

    /// Send `command`, retrying definitive failures up to `retries` times.
    /// Inconclusive and authentication failures are returned at once.
    async fn send_with_retries(&self, command: Command, retries: u32) -> Result<(), ApiError> {
        let mut attempt = 0;
        loop {
            match self.send(command).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_inconclusive() || e.is_auth() || attempt >= retries => {
                    return Err(e)
                }
                Err(e) => {
                    attempt += 1;
                    tracing::warn!(
                        "{:?} failed ({}), retry {}/{}",
                        command,
                        e,
                        attempt,
                        retries
                    );
                    tokio::time::sleep(self.timing.retry_delay).await;
                }
            }
        }
    }

    /// Seek to `position_ms`, clamped into the current track.
    pub async fn seek(&mut self, position_ms: u64) -> Option<Followup> {
        let target = if self.snapshot.duration_ms > 0 {
            position_ms.min(self.snapshot.duration_ms)
        } else {
            position_ms
        };
        let previous = self.snapshot.progress_ms;
        self.snapshot.progress_ms = target;

        match self.client.seek(target, None).await {
            Ok(()) => None,
            Err(e) if e.is_inconclusive() => Some(Followup::Poll {
                after: Duration::ZERO,
            }),
            Err(e) => {
                self.snapshot.progress_ms = previous;
                if !e.is_auth() {
                    self.show_notice(e.user_message());
                }
                None
            }
        }
    }

    /// Seek by `delta_ms` relative to the local progress.
    pub async fn seek_relative(&mut self, delta_ms: i64) -> Option<Followup> {
        let target = self
            .snapshot
            .progress_ms
            .saturating_add_signed(delta_ms);
        self.seek(target).await
    }

    pub async fn toggle_shuffle(&mut self) {
        let previous = self.snapshot.shuffle;
        self.snapshot.shuffle = !previous;
        if let Err(e) = self.client.set_shuffle(!previous, None).await {
            self.revert_on_failure(e, |c| c.snapshot.shuffle = previous);
        }
    }

    /// Advance repeat off -> context -> track -> off.
    pub async fn cycle_repeat(&mut self) {
        let previous = self.snapshot.repeat;
        let next = previous.next();
        self.snapshot.repeat = next;
        if let Err(e) = self.client.set_repeat(next, None).await {
            self.revert_on_failure(e, |c| c.snapshot.repeat = previous);
        }
    }

    pub async fn change_volume(&mut self, delta: i16) {
        let previous = self.volume;
        let current = i16::from(previous.unwrap_or(DEFAULT_VOLUME));
        let target = (current + delta).clamp(0, 100) as u8;
        self.volume = Some(target);
        if let Err(e) = self.client.set_volume(target, None).await {
            self.revert_on_failure(e, |c| c.volume = previous);
        }
    }

    /// Undo a local change unless the failure was inconclusive.
    fn revert_on_failure(&mut self, err: ApiError, revert: impl FnOnce(&mut Self)) {
        if err.is_inconclusive() {
            tracing::debug!("Unreadable response, keeping local state: {}", err);
            return;
        }
        revert(self);
        if !err.is_auth() {
            self.show_notice(err.user_message());
        }
    }

    /// Save or remove the current track depending on its saved status.
    pub async fn toggle_like(&mut self) -> Option<Followup> {
        let track_id = self.snapshot.library_id()?;
        let currently_liked = self.read_saved(&track_id).await;

        let result = if currently_liked {
            self.client.remove_track(&track_id).await
        } else {
            self.client.save_track(&track_id).await
        };

        match result {
            Ok(()) => {
                self.liked = !currently_liked;
                return None;
            }
            Err(e) if e.is_auth() => {
                tracing::warn!("Failed to update saved status of {}: {}", track_id, e);
                return None;
            }
            Err(e) if e.is_inconclusive() => {
                tracing::debug!("Like response unreadable, verifying {}", track_id);
            }
            // The write may still have landed server-side.
            Err(e) => {
                tracing::warn!("Failed to update saved status of {}: {}", track_id, e);
            }
        }
        Some(Followup::VerifyLike {
            track_id,
            previously_liked: currently_liked,
            after: self.timing.like_verify,
        })
    }

    /// Settle the heart after a like/unlike that did not report success.
    pub async fn verify_like(&mut self, track_id: &str, previously_liked: bool) {
        if self.snapshot.library_id().as_deref() != Some(track_id) {
            tracing::debug!("Track changed before like verification, skipping");
            return;
        }
        match self.client.is_track_saved(track_id).await {
            Ok(saved) => {
                if saved == previously_liked {
                    tracing::warn!("Saved status of {} did not change", track_id);
                }
                self.liked = saved;
            }
            Err(e) => tracing::debug!("Like verification read failed: {}", e),
        }
    }

    /// Move playback to the active device, or the first available one.
    pub async fn activate_device(&mut self) -> Option<Followup> {
        let devices = match self.client.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                if !e.is_auth() {
                    self.show_notice(e.user_message());
                }
                return None;
            }
        };

        let target = devices
            .iter()
            .find(|d| d.is_active)
            .or_else(|| devices.iter().find(|d| !d.is_restricted))
            .and_then(|d| d.id.clone().map(|id| (id, d.name.clone())));
        let Some((id, name)) = target else {
            self.show_notice("No Spotify devices available");
            return None;
        };

        match self.client.transfer_playback(&id, false).await {
            Ok(()) => {
                self.show_notice(format!("Connected to {}", name));
                Some(Followup::Poll {
                    after: self.timing.skip_confirm,
                })
            }
            Err(e) if e.is_inconclusive() => Some(Followup::Poll {
                after: self.timing.skip_confirm,
            }),
            Err(e) => {
                if !e.is_auth() {
                    self.show_notice(e.user_message());
                }
                None
            }
        }
    }
}

fn idle_snapshot(track: &Track) -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_playing: false,
        progress_ms: 0,
        ..PlaybackSnapshot::from_track(track)
    }
}

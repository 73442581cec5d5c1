//! Shared player state
//!
//! The state container owned by the lifecycle manager and mirrored from bus
//! events by the playback manager. Readers take cheap snapshots; the mutex is
//! only held for field updates and never across an await.

use cadence_common::DriverMode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Descriptive metadata supplied with a track
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<String>,
    /// Duration hint in seconds, replaced once the transport knows better
    pub duration: Option<f64>,
}

/// Inbound track description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub source_uri: String,
    #[serde(default)]
    pub metadata: Option<TrackMetadata>,
}

impl Track {
    pub fn new(id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }
}

/// Coarse playback status shown to observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

/// Point-in-time copy of the player state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub status: PlaybackStatus,
    pub track: Option<Track>,
    pub position: f64,
    pub duration: Option<f64>,
    pub buffered_ahead: f64,
    pub volume: f64,
    pub looping: bool,
    pub mode: DriverMode,
    pub dsp_enabled: bool,
    pub theme_key: Option<String>,
    pub last_error: Option<String>,
    pub synthesized_ends: u64,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            track: None,
            position: 0.0,
            duration: None,
            buffered_ahead: 0.0,
            volume: 1.0,
            looping: false,
            mode: DriverMode::Audiophile,
            dsp_enabled: false,
            theme_key: None,
            last_error: None,
            synthesized_ends: 0,
        }
    }
}

/// Player state shared between the lifecycle and playback managers
#[derive(Debug, Default)]
pub struct PlayerState {
    fields: Mutex<PlayerSnapshot>,

    /// Times a watchdog had to synthesize the end of a track
    synthesized_ends: AtomicU64,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn fields(&self) -> MutexGuard<'_, PlayerSnapshot> {
        self.fields.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> PlayerSnapshot {
        let mut snapshot = self.fields().clone();
        snapshot.synthesized_ends = self.synthesized_ends.load(Ordering::Relaxed);
        snapshot
    }

    /// Apply `f` to the fields under the lock
    pub fn update<F: FnOnce(&mut PlayerSnapshot)>(&self, f: F) {
        f(&mut self.fields());
    }

    pub fn status(&self) -> PlaybackStatus {
        self.fields().status
    }

    pub fn set_status(&self, status: PlaybackStatus) {
        self.fields().status = status;
    }

    /// Replace the current track; position and timing reset
    pub fn set_track(&self, track: Option<Track>) {
        let mut fields = self.fields();
        fields.duration = track
            .as_ref()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.duration);
        fields.track = track;
        fields.position = 0.0;
        fields.buffered_ahead = 0.0;
        fields.last_error = None;
    }

    pub fn track(&self) -> Option<Track> {
        self.fields().track.clone()
    }

    pub fn set_position(&self, position: f64, duration: Option<f64>) {
        let mut fields = self.fields();
        fields.position = position;
        if duration.is_some() {
            fields.duration = duration;
        }
    }

    pub fn position(&self) -> f64 {
        self.fields().position
    }

    pub fn set_duration(&self, duration: f64) {
        self.fields().duration = Some(duration);
    }

    pub fn set_buffered(&self, seconds: f64) {
        self.fields().buffered_ahead = seconds;
    }

    pub fn set_volume(&self, volume: f64) {
        self.fields().volume = volume.clamp(0.0, 1.0);
    }

    pub fn volume(&self) -> f64 {
        self.fields().volume
    }

    pub fn set_looping(&self, looping: bool) {
        self.fields().looping = looping;
    }

    pub fn set_mode(&self, mode: DriverMode) {
        self.fields().mode = mode;
    }

    pub fn set_dsp_enabled(&self, enabled: bool) {
        self.fields().dsp_enabled = enabled;
    }

    pub fn set_theme(&self, key: &str) {
        self.fields().theme_key = Some(key.to_string());
    }

    pub fn set_error(&self, error: impl Into<String>) {
        let mut fields = self.fields();
        fields.last_error = Some(error.into());
        fields.status = PlaybackStatus::Error;
    }

    pub fn increment_synthesized_ends(&self) {
        self.synthesized_ends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn synthesized_ends(&self) -> u64 {
        self.synthesized_ends.load(Ordering::Relaxed)
    }
}

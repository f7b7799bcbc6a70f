use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Track;

/// The status of a venue's player.
///
/// `idle → ready → playing ⇄ paused → stopped → idle`, with any status
/// moving to `inactive` when heartbeats stop and back to `ready` on the
/// next heartbeat.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueStatus {
    #[default]
    Idle,
    Ready,
    Playing,
    Paused,
    Stopped,
    Inactive,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Inactive => "inactive",
        }
    }

    /// The status after a heartbeat from the host player is received
    pub fn after_heartbeat(self) -> Self {
        match self {
            Self::Idle | Self::Inactive => Self::Ready,
            other => other,
        }
    }

    /// Whether the playback cursor means anything in this status
    pub fn has_position(&self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

impl Display for VenueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VenueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "ready" => Ok(Self::Ready),
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown venue status {:?}", other)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// The current track restarts when it ends
    One,
    /// Played tracks are appended back to the end of the queue
    All,
}

impl RepeatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::One => "one",
            Self::All => "all",
        }
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "one" => Ok(Self::One),
            "all" => Ok(Self::All),
            other => Err(format!("unknown repeat mode {:?}", other)),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSettings {
    pub repeat_mode: RepeatMode,
    pub crossfade_seconds: f64,
}

/// The synchronized playback state of a venue.
///
/// This is everything commands mutate. Identity, ownership and liveness
/// timestamps live with the stored venue record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: VenueStatus,
    pub now_playing: Option<Track>,
    pub current_time_seconds: f64,
    pub volume: u8,
    pub active_queue: Vec<Track>,
    pub priority_queue: Vec<Track>,
    /// Previously played tracks, most recent last
    pub history: Vec<Track>,
    pub is_shuffled: bool,
    pub player_settings: PlayerSettings,
}

impl PlaybackState {
    pub const DEFAULT_VOLUME: u8 = 50;

    /// Starts playing a track from the beginning
    pub(crate) fn start(&mut self, track: Track) {
        self.now_playing = Some(track);
        self.status = VenueStatus::Playing;
        self.current_time_seconds = 0.;
    }

    /// Restores the cursor invariant after a mutation.
    pub(crate) fn normalize(&mut self) {
        if !self.status.has_position() {
            self.current_time_seconds = 0.;
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: VenueStatus::Idle,
            now_playing: None,
            current_time_seconds: 0.,
            volume: Self::DEFAULT_VOLUME,
            active_queue: vec![],
            priority_queue: vec![],
            history: vec![],
            is_shuffled: false,
            player_settings: Default::default(),
        }
    }
}

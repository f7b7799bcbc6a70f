//! All schemas that are exposed from endpoints are defined here
//! along with the ToSerialized impls

use chrono::{DateTime, Utc};
use jukebox_collab::{ActivityLogData, UserData, VenueData, VenueEvent};
use jukebox_core::{PlayerSettings as CorePlayerSettings, Track as CoreTrack};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    /// The kind of error, such as `InvalidPayload` or `NotFound`
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    id: i32,
    external_id: String,
    email: String,
    venue_id: Option<i32>,
    role: String,
    is_active: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    video_id: String,
    title: String,
    channel_title: String,
    duration_seconds: f64,
    thumbnail_url: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSettings {
    /// One of `off`, `one` or `all`
    repeat_mode: String,
    crossfade_seconds: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Venue {
    id: i32,
    owner_id: i32,
    name: String,
    /// One of `idle`, `ready`, `playing`, `paused`, `stopped` or `inactive`
    status: String,
    now_playing: Option<Track>,
    current_time_seconds: f64,
    volume: u8,
    active_queue: Vec<Track>,
    priority_queue: Vec<Track>,
    history: Vec<Track>,
    is_shuffled: bool,
    player_settings: PlayerSettings,
    /// Incremented on every change, newer states have higher versions
    version: i64,
    last_heartbeat_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    id: i32,
    user_id: Option<i32>,
    venue_id: Option<i32>,
    event_type: String,
    #[schema(value_type = Object)]
    event_data: serde_json::Value,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    pub command: String,
    pub venue_id: i32,
    /// The version of the venue after the command
    pub version: i64,
    pub timestamp: DateTime<Utc>,
}

/// Messages pushed to realtime clients
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The full state of a venue, sent when joining
    VenueSnapshot { venue: Venue },
    /// The full state of a venue after it changed
    PlayerStateUpdate { venue: Venue },
    /// A track was inserted into a queue, followed by a state update
    #[serde(rename = "queue:insert")]
    QueueInsert {
        #[serde(rename = "venueId")]
        venue_id: i32,
        version: i64,
        track: Track,
        position: usize,
        priority: bool,
    },
    /// The client is no longer joined to the venue
    LeftVenue {
        #[serde(rename = "venueId")]
        venue_id: i32,
    },
    Error { error: String, message: String },
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl<I, O> ToSerialized<Option<O>> for Option<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Option<O> {
        self.as_ref().map(|x| x.to_serialized())
    }
}

impl ToSerialized<Account> for UserData {
    fn to_serialized(&self) -> Account {
        Account {
            id: self.id,
            external_id: self.external_id.clone(),
            email: self.email.clone(),
            venue_id: self.venue_id,
            role: self.role.to_string(),
            is_active: self.is_active,
        }
    }
}

impl ToSerialized<Track> for CoreTrack {
    fn to_serialized(&self) -> Track {
        Track {
            video_id: self.video_id.clone(),
            title: self.title.clone(),
            channel_title: self.channel_title.clone(),
            duration_seconds: self.duration_seconds,
            thumbnail_url: self.thumbnail_url.clone(),
        }
    }
}

impl ToSerialized<PlayerSettings> for CorePlayerSettings {
    fn to_serialized(&self) -> PlayerSettings {
        PlayerSettings {
            repeat_mode: self.repeat_mode.as_str().to_string(),
            crossfade_seconds: self.crossfade_seconds,
        }
    }
}

impl ToSerialized<Venue> for VenueData {
    fn to_serialized(&self) -> Venue {
        let playback = &self.playback;

        Venue {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name.clone(),
            status: playback.status.to_string(),
            now_playing: playback.now_playing.to_serialized(),
            current_time_seconds: playback.current_time_seconds,
            volume: playback.volume,
            active_queue: playback.active_queue.to_serialized(),
            priority_queue: playback.priority_queue.to_serialized(),
            history: playback.history.to_serialized(),
            is_shuffled: playback.is_shuffled,
            player_settings: playback.player_settings.to_serialized(),
            version: self.version,
            last_heartbeat_at: self.last_heartbeat_at,
            last_updated_at: self.last_updated_at,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<ActivityEntry> for ActivityLogData {
    fn to_serialized(&self) -> ActivityEntry {
        ActivityEntry {
            id: self.id,
            user_id: self.user_id,
            venue_id: self.venue_id,
            event_type: self.event_type.clone(),
            event_data: self.event_data.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<ServerEvent> for VenueEvent {
    fn to_serialized(&self) -> ServerEvent {
        match self {
            VenueEvent::Snapshot(venue) => ServerEvent::VenueSnapshot {
                venue: venue.to_serialized(),
            },
            VenueEvent::StateUpdate(venue) => ServerEvent::PlayerStateUpdate {
                venue: venue.to_serialized(),
            },
            VenueEvent::QueueInsert {
                venue_id,
                version,
                insert,
            } => ServerEvent::QueueInsert {
                venue_id: *venue_id,
                version: *version,
                track: insert.track.to_serialized(),
                position: insert.position,
                priority: insert.priority,
            },
        }
    }
}

impl ServerEvent {
    /// The name used for the event field of server sent events
    pub fn name(&self) -> &'static str {
        match self {
            Self::VenueSnapshot { .. } => "venueSnapshot",
            Self::PlayerStateUpdate { .. } => "playerStateUpdate",
            Self::QueueInsert { .. } => "queue:insert",
            Self::LeftVenue { .. } => "leftVenue",
            Self::Error { .. } => "error",
        }
    }
}

use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use jukebox_core::PlaybackState;
use serde_json::Value;

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// May control every venue
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(format!("unknown role {:?}", other)),
        }
    }
}

/// A jukebox account, provisioned from a verified identity
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    /// The user id issued by the identity provider
    pub external_id: String,
    pub email: String,
    /// The user's personal venue
    pub venue_id: Option<PrimaryKey>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A jukebox venue
#[derive(Debug, Clone)]
pub struct VenueData {
    pub id: PrimaryKey,
    pub owner_id: PrimaryKey,
    pub name: String,
    pub playback: PlaybackState,
    /// Incremented on every persisted state change
    pub version: i64,
    /// The command that produced the current playback state
    pub last_command_id: Option<String>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of something that happened
#[derive(Debug, Clone)]
pub struct ActivityLogData {
    pub id: PrimaryKey,
    pub user_id: Option<PrimaryKey>,
    pub venue_id: Option<PrimaryKey>,
    pub event_type: String,
    pub event_data: Value,
    pub created_at: DateTime<Utc>,
}

impl UserData {
    /// Whether the user may do anything to the venue, not just queue tracks
    pub fn controls(&self, venue: &VenueData) -> bool {
        self.role == Role::Admin || venue.owner_id == self.id
    }
}

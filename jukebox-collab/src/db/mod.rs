use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jukebox_core::{CommandError, PlaybackState};
use serde_json::Value;
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// The database could not be reached, or did not answer in time
    #[error("Database is unavailable: {0}")]
    Unavailable(String),
    /// A resource already exists, or was changed by someone else
    #[error("{resource} with {field} of value {value} conflicts with an existing record")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn any(self) -> DatabaseError;
    /// Maps a unique violation to a conflict, anything else like `any`
    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(DatabaseError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl From<DatabaseError> for CommandError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::NotFound {
                resource,
                identifier,
            } => Self::NotFound {
                resource,
                identifier: identifier.to_string(),
            },
            e @ DatabaseError::Conflict { .. } => Self::Conflict(e.to_string()),
            DatabaseError::Unavailable(reason) => Self::StoreUnavailable(reason),
            DatabaseError::Internal(e) => Self::StoreUnavailable(e.to_string()),
        }
    }
}

/// The system of record for users, venues and the activity log.
///
/// Every write that changes a venue's playback bumps its version. Writes
/// that carry an expected version fail with a conflict if it moved.
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_external_id(&self, external_id: &str) -> Result<UserData>;
    /// Creates a user together with their personal venue
    async fn provision_user(&self, new_user: NewUser) -> Result<UserData>;

    async fn venue_by_id(&self, venue_id: PrimaryKey) -> Result<VenueData>;
    /// Creates a venue and records the entry against it
    async fn create_venue(
        &self,
        new_venue: NewVenue,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData>;
    /// Persists new playback state and the entry describing it, or neither
    async fn commit_venue(
        &self,
        commit: VenueCommit,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData>;
    /// Marks the venue as alive, waking it up if it was idle or inactive
    async fn record_heartbeat(&self, venue_id: PrimaryKey, at: DateTime<Utc>)
        -> Result<VenueData>;
    /// Marks every venue without a heartbeat since `cutoff` as inactive
    async fn mark_stale_venues_inactive(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<VenueData>>;

    /// Returns the newest entries for a venue first
    async fn list_activity(&self, venue_id: PrimaryKey, limit: i64)
        -> Result<Vec<ActivityLogData>>;
    /// Deletes entries older than `cutoff`, returning how many were removed
    async fn delete_activity_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug)]
pub struct NewUser {
    pub external_id: String,
    pub email: String,
    pub role: Role,
    /// The name of the personal venue created for the user
    pub venue_name: String,
}

#[derive(Debug)]
pub struct NewVenue {
    pub name: String,
    /// The owner of the new venue
    pub owner_id: PrimaryKey,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct VenueCommit {
    pub id: PrimaryKey,
    /// The version the new state was derived from
    pub expected_version: i64,
    /// Identifies the command, stays the same across its retries
    pub command_id: String,
    pub playback: PlaybackState,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivityLogEntry {
    pub user_id: Option<PrimaryKey>,
    pub venue_id: Option<PrimaryKey>,
    pub event_type: String,
    pub event_data: Value,
    pub created_at: DateTime<Utc>,
}

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jukebox_core::{PlaybackState, VenueStatus};
use parking_lot::Mutex;

use crate::{
    ActivityLogData, Database, DatabaseError, NewActivityLogEntry, NewUser, NewVenue, PrimaryKey,
    Result, UserData, VenueCommit, VenueData,
};

/// An in-process database, used when no database url is configured and in tests.
///
/// All tables sit behind one lock, so every write is atomic.
#[derive(Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    next_id: PrimaryKey,
    users: HashMap<PrimaryKey, UserData>,
    venues: HashMap<PrimaryKey, VenueData>,
    activity: Vec<ActivityLogData>,
    /// How many upcoming writes should fail
    failing_writes: u32,
    /// Held after the next commit lands, before it answers
    commit_stall: Option<Duration>,
    /// How many upcoming lookups by external id should miss
    missing_lookups: u32,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail as if the database was unreachable.
    pub fn fail_next_writes(&self, count: u32) {
        self.tables.lock().failing_writes = count;
    }

    /// Makes the next commit land, then answer only after `delay`.
    pub fn stall_next_commit(&self, delay: Duration) {
        self.tables.lock().commit_stall = Some(delay);
    }

    /// Makes the next `count` lookups by external id report a missing user.
    pub fn miss_next_lookups(&self, count: u32) {
        self.tables.lock().missing_lookups = count;
    }

    /// Enables or disables a user's account.
    pub fn set_user_active(&self, user_id: PrimaryKey, is_active: bool) {
        if let Some(user) = self.tables.lock().users.get_mut(&user_id) {
            user.is_active = is_active;
        }
    }

    /// Returns every stored activity entry, oldest first.
    pub fn all_activity(&self) -> Vec<ActivityLogData> {
        self.tables.lock().activity.clone()
    }
}

impl Tables {
    fn next_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }

    fn check_write(&mut self) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(DatabaseError::Unavailable("simulated outage".to_string()));
        }

        Ok(())
    }

    fn insert_venue(&mut self, new_venue: NewVenue) -> VenueData {
        let venue = VenueData {
            id: self.next_id(),
            owner_id: new_venue.owner_id,
            name: new_venue.name,
            playback: PlaybackState::default(),
            version: 1,
            last_command_id: None,
            last_heartbeat_at: new_venue.created_at,
            last_updated_at: new_venue.created_at,
            created_at: new_venue.created_at,
        };

        self.venues.insert(venue.id, venue.clone());
        venue
    }

    fn insert_activity(&mut self, entry: NewActivityLogEntry) {
        let id = self.next_id();

        self.activity.push(ActivityLogData {
            id,
            user_id: entry.user_id,
            venue_id: entry.venue_id,
            event_type: entry.event_type,
            event_data: entry.event_data,
            created_at: entry.created_at,
        });
    }

    fn venue_mut(&mut self, venue_id: PrimaryKey) -> Result<&mut VenueData> {
        self.venues
            .get_mut(&venue_id)
            .ok_or(DatabaseError::NotFound {
                resource: "venue",
                identifier: "id",
            })
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.tables
            .lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    async fn user_by_external_id(&self, external_id: &str) -> Result<UserData> {
        let mut tables = self.tables.lock();
        let not_found = DatabaseError::NotFound {
            resource: "user",
            identifier: "external_id",
        };

        if tables.missing_lookups > 0 {
            tables.missing_lookups -= 1;
            return Err(not_found);
        }

        tables
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned()
            .ok_or(not_found)
    }

    async fn provision_user(&self, new_user: NewUser) -> Result<UserData> {
        let mut tables = self.tables.lock();
        tables.check_write()?;

        if tables
            .users
            .values()
            .any(|u| u.external_id == new_user.external_id)
        {
            return Err(DatabaseError::Conflict {
                resource: "user",
                field: "external_id",
                value: new_user.external_id,
            });
        }

        let now = Utc::now();
        let user_id = tables.next_id();

        let venue = tables.insert_venue(NewVenue {
            name: new_user.venue_name,
            owner_id: user_id,
            created_at: now,
        });

        let user = UserData {
            id: user_id,
            external_id: new_user.external_id,
            email: new_user.email,
            venue_id: Some(venue.id),
            role: new_user.role,
            is_active: true,
            created_at: now,
        };

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn venue_by_id(&self, venue_id: PrimaryKey) -> Result<VenueData> {
        self.tables.lock().venue_mut(venue_id).map(|v| v.clone())
    }

    async fn create_venue(
        &self,
        new_venue: NewVenue,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData> {
        let mut tables = self.tables.lock();
        tables.check_write()?;

        let venue = tables.insert_venue(new_venue);

        tables.insert_activity(NewActivityLogEntry {
            venue_id: Some(venue.id),
            ..entry
        });

        Ok(venue)
    }

    async fn commit_venue(
        &self,
        commit: VenueCommit,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData> {
        let (updated, stall) = {
            let mut tables = self.tables.lock();
            tables.check_write()?;

            let venue = tables.venue_mut(commit.id)?;

            if venue.version != commit.expected_version {
                return Err(DatabaseError::Conflict {
                    resource: "venue",
                    field: "version",
                    value: commit.expected_version.to_string(),
                });
            }

            venue.playback = commit.playback;
            venue.version += 1;
            venue.last_command_id = Some(commit.command_id);
            venue.last_updated_at = commit.updated_at;

            let updated = venue.clone();
            tables.insert_activity(entry);

            (updated, tables.commit_stall.take())
        };

        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        Ok(updated)
    }

    async fn record_heartbeat(
        &self,
        venue_id: PrimaryKey,
        at: DateTime<Utc>,
    ) -> Result<VenueData> {
        let mut tables = self.tables.lock();
        tables.check_write()?;

        let venue = tables.venue_mut(venue_id)?;
        let status = venue.playback.status.after_heartbeat();

        venue.last_heartbeat_at = at;

        if status != venue.playback.status {
            venue.playback.status = status;
            venue.version += 1;
            venue.last_updated_at = at;
        }

        Ok(venue.clone())
    }

    async fn mark_stale_venues_inactive(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<VenueData>> {
        let mut tables = self.tables.lock();
        tables.check_write()?;

        let stale = tables
            .venues
            .values_mut()
            .filter(|v| v.playback.status != VenueStatus::Inactive && v.last_heartbeat_at < cutoff)
            .map(|venue| {
                venue.playback.status = VenueStatus::Inactive;
                venue.version += 1;
                venue.last_updated_at = at;
                venue.clone()
            })
            .collect();

        Ok(stale)
    }

    async fn list_activity(
        &self,
        venue_id: PrimaryKey,
        limit: i64,
    ) -> Result<Vec<ActivityLogData>> {
        let tables = self.tables.lock();

        let entries = tables
            .activity
            .iter()
            .rev()
            .filter(|e| e.venue_id == Some(venue_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(entries)
    }

    async fn delete_activity_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.tables.lock();
        tables.check_write()?;

        let before = tables.activity.len();
        tables.activity.retain(|e| e.created_at >= cutoff);

        Ok((before - tables.activity.len()) as u64)
    }
}

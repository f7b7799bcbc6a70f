mod maintenance;

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jukebox_core::{Command, CommandError, CommandResult};
use log::{debug, error, info, warn};
use serde_json::json;
use tokio::{
    sync::{Mutex, MutexGuard},
    time::timeout,
};
use uuid::Uuid;

use crate::{
    rooms::{room_name, ClientId},
    ActivityLogData, CollabContext, NewActivityLogEntry, NewVenue, PrimaryKey, UserData,
    VenueCommit, VenueData, VenueEvent,
};

pub use maintenance::*;

/// The result of a successfully applied command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub venue: VenueData,
    pub timestamp: DateTime<Utc>,
}

/// Applies commands to venues and keeps their rooms up to date.
pub struct VenueManager {
    context: CollabContext,
    /// Serializes commands per venue
    locks: DashMap<PrimaryKey, Arc<Mutex<()>>>,
}

impl VenueManager {
    pub const MAX_VENUE_NAME_LENGTH: usize = 128;
    pub const MAX_ACTIVITY_LIMIT: i64 = 100;

    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
            locks: Default::default(),
        }
    }

    /// Creates a new idle venue owned by the actor
    pub async fn create_venue(&self, actor: &UserData, name: &str) -> CommandResult<VenueData> {
        let name = name.trim();

        if name.is_empty() || name.chars().count() > Self::MAX_VENUE_NAME_LENGTH {
            return Err(CommandError::invalid_payload(format!(
                "name must be between 1 and {} characters",
                Self::MAX_VENUE_NAME_LENGTH
            )));
        }

        let now = Utc::now();

        let venue = self
            .retrying("create_venue", || {
                self.store(self.context.database.create_venue(
                    NewVenue {
                        name: name.to_string(),
                        owner_id: actor.id,
                        created_at: now,
                    },
                    NewActivityLogEntry {
                        user_id: Some(actor.id),
                        venue_id: None,
                        event_type: "create_venue".to_string(),
                        event_data: json!({ "name": name }),
                        created_at: now,
                    },
                ))
            })
            .await?;

        info!("User {} created venue {} ({})", actor.id, venue.id, venue.name);
        Ok(venue)
    }

    /// Returns the stored venue
    pub async fn venue(&self, venue_id: PrimaryKey) -> CommandResult<VenueData> {
        self.store(self.context.database.venue_by_id(venue_id)).await
    }

    /// Validates, applies and persists a command, then broadcasts the new state.
    pub async fn apply(
        &self,
        venue_id: PrimaryKey,
        command: Command,
        actor: &UserData,
    ) -> CommandResult<CommandOutcome> {
        // Retries must apply exactly the same command
        let command = command.resolve();
        let command_id = Uuid::new_v4().to_string();

        let lock = self.lock_for(venue_id);
        let _guard = lock.lock().await;

        let result = self
            .retrying(command.name(), || {
                self.try_apply(venue_id, &command, &command_id, actor)
            })
            .await;

        match &result {
            Ok(outcome) => debug!(
                "Applied {} to {} at version {}",
                command.name(),
                room_name(venue_id),
                outcome.venue.version
            ),
            Err(e) if e.is_retryable() => error!(
                "Failed to apply {} to {}: {}",
                command.name(),
                room_name(venue_id),
                e
            ),
            Err(e) => warn!(
                "Rejected {} to {} from user {}: {}",
                command.name(),
                room_name(venue_id),
                actor.id,
                e
            ),
        }

        result
    }

    async fn try_apply(
        &self,
        venue_id: PrimaryKey,
        command: &Command,
        command_id: &str,
        actor: &UserData,
    ) -> CommandResult<CommandOutcome> {
        let venue = self.venue(venue_id).await?;

        // An earlier attempt committed but its answer was lost
        if venue.last_command_id.as_deref() == Some(command_id) {
            info!(
                "{} already landed in {} at version {}",
                command.name(),
                room_name(venue_id),
                venue.version
            );

            let timestamp = venue.last_updated_at;
            self.context
                .broadcaster
                .publish(VenueEvent::StateUpdate(Arc::new(venue.clone())));

            return Ok(CommandOutcome { venue, timestamp });
        }

        if !command.is_open_to_guests() && !actor.controls(&venue) {
            return Err(CommandError::Unauthorized(format!(
                "only the owner may {} in this venue",
                command.name()
            )));
        }

        let mut playback = venue.playback.clone();
        let applied = command.apply(&mut playback, &self.context.config)?;
        let now = Utc::now();

        let updated = self
            .store(self.context.database.commit_venue(
                VenueCommit {
                    id: venue.id,
                    expected_version: venue.version,
                    command_id: command_id.to_string(),
                    playback,
                    updated_at: now,
                },
                NewActivityLogEntry {
                    user_id: Some(actor.id),
                    venue_id: Some(venue.id),
                    event_type: command.name().to_string(),
                    event_data: command.summary(),
                    created_at: now,
                },
            ))
            .await?;

        let broadcaster = &self.context.broadcaster;

        if let Some(insert) = applied.queue_insert {
            broadcaster.publish(VenueEvent::QueueInsert {
                venue_id: updated.id,
                version: updated.version,
                insert,
            });
        }

        broadcaster.publish(VenueEvent::StateUpdate(Arc::new(updated.clone())));

        Ok(CommandOutcome {
            venue: updated,
            timestamp: now,
        })
    }

    /// Records a heartbeat from the venue's host player
    pub async fn heartbeat(&self, venue_id: PrimaryKey, actor: &UserData) -> CommandResult<VenueData> {
        let lock = self.lock_for(venue_id);
        let _guard = lock.lock().await;

        let venue = self.venue(venue_id).await?;

        if !actor.controls(&venue) {
            return Err(CommandError::Unauthorized(
                "only the owner may send heartbeats".to_string(),
            ));
        }

        let updated = self
            .retrying("heartbeat", || {
                self.store(
                    self.context
                        .database
                        .record_heartbeat(venue_id, Utc::now()),
                )
            })
            .await?;

        if updated.playback.status != venue.playback.status {
            info!(
                "{} is now {} after a heartbeat",
                room_name(venue_id),
                updated.playback.status
            );

            self.context
                .broadcaster
                .publish(VenueEvent::StateUpdate(Arc::new(updated.clone())));
        }

        Ok(updated)
    }

    /// Returns the newest activity entries of a venue
    pub async fn activity(
        &self,
        venue_id: PrimaryKey,
        actor: &UserData,
        limit: i64,
    ) -> CommandResult<Vec<ActivityLogData>> {
        if !(1..=Self::MAX_ACTIVITY_LIMIT).contains(&limit) {
            return Err(CommandError::invalid_payload(format!(
                "limit must be between 1 and {}",
                Self::MAX_ACTIVITY_LIMIT
            )));
        }

        let venue = self.venue(venue_id).await?;

        if !actor.controls(&venue) {
            return Err(CommandError::Unauthorized(
                "only the owner may read the activity log".to_string(),
            ));
        }

        self.store(self.context.database.list_activity(venue_id, limit))
            .await
    }

    /// Joins a client to a venue's room, queueing a snapshot for it
    pub async fn join(&self, client_id: ClientId, venue_id: PrimaryKey) -> CommandResult<()> {
        let venue = self.venue(venue_id).await?;

        if !self.context.broadcaster.subscribe(client_id, venue) {
            return Err(CommandError::NotFound {
                resource: "client",
                identifier: client_id.to_string(),
            });
        }

        Ok(())
    }

    /// Removes a client from a venue's room, returns false if it wasn't joined
    pub fn leave(&self, client_id: ClientId, venue_id: PrimaryKey) -> bool {
        self.context.broadcaster.registry().leave(client_id, venue_id)
    }

    fn lock_for(&self, venue_id: PrimaryKey) -> VenueLock<'_> {
        VenueLock {
            venue_id,
            locks: &self.locks,
            lock: self.locks.entry(venue_id).or_default().clone(),
        }
    }

    /// Bounds a store call by the configured timeout
    async fn store<T>(
        &self,
        call: impl Future<Output = crate::Result<T>>,
    ) -> CommandResult<T> {
        match timeout(self.context.config.store_timeout(), call).await {
            Ok(result) => result.map_err(CommandError::from),
            Err(_) => Err(CommandError::StoreUnavailable(format!(
                "store did not answer within {}ms",
                self.context.config.store_timeout_in_millis
            ))),
        }
    }

    /// Runs the operation again while it fails with a retryable error
    async fn retrying<T, F, Fut>(&self, what: &str, mut operation: F) -> CommandResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CommandResult<T>>,
    {
        let config = &self.context.config;
        let mut attempt = 0;

        loop {
            match operation().await {
                Err(e) if e.is_retryable() && attempt < config.store_retry_limit => {
                    attempt += 1;

                    warn!(
                        "{} failed, retrying ({}/{}): {}",
                        what, attempt, config.store_retry_limit, e
                    );

                    tokio::time::sleep(config.retry_backoff(attempt)).await;
                }
                result => return result,
            }
        }
    }
}

/// A handle to a venue's command lock, dropped from the map once unused
struct VenueLock<'a> {
    venue_id: PrimaryKey,
    locks: &'a DashMap<PrimaryKey, Arc<Mutex<()>>>,
    lock: Arc<Mutex<()>>,
}

impl VenueLock<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for VenueLock<'_> {
    fn drop(&mut self) {
        // The map and this handle are the only owners when nobody else waits
        self.locks
            .remove_if(&self.venue_id, |_, lock| Arc::strong_count(lock) == 2);
    }
}

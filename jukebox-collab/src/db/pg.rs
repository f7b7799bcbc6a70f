use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jukebox_core::{PlaybackState, PlayerSettings, Track};
use log::info;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    query,
    types::Json,
    Error as SqlxError, PgPool, Postgres, Row, Transaction,
};

use crate::{
    ActivityLogData, Database, DatabaseError, DatabaseResult, IntoDatabaseError,
    NewActivityLogEntry, NewUser, NewVenue, PrimaryKey, Result, UserData, VenueCommit, VenueData,
};

/// A postgres database implementation for the jukebox
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connects to the database and brings the schema up to date.
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        info!("Connected to database and applied migrations");

        Ok(Self { pool })
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(|e| e.any())
    }

    async fn insert_venue(
        tx: &mut Transaction<'static, Postgres>,
        new_venue: NewVenue,
    ) -> Result<VenueData> {
        let row = query(
            "
            INSERT INTO venues (owner_id, name, last_heartbeat_at, last_updated_at, created_at)
            VALUES ($1, $2, $3, $3, $3)
            RETURNING *",
        )
        .bind(new_venue.owner_id)
        .bind(new_venue.name)
        .bind(new_venue.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| e.any())?;

        venue_from_row(&row)
    }

    async fn insert_activity(
        tx: &mut Transaction<'static, Postgres>,
        entry: NewActivityLogEntry,
    ) -> Result<()> {
        query(
            "
            INSERT INTO activity_log (user_id, venue_id, event_type, event_data, created_at)
            VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.user_id)
        .bind(entry.venue_id)
        .bind(entry.event_type)
        .bind(entry.event_data)
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| e.any())
        .map(|_| ())
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))?;

        user_from_row(&row)
    }

    async fn user_by_external_id(&self, external_id: &str) -> Result<UserData> {
        let row = query("SELECT * FROM users WHERE external_id = $1")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "external_id"))?;

        user_from_row(&row)
    }

    async fn provision_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_external_id(&new_user.external_id)
            .await
            .conflict_or_ok("user", "external_id", &new_user.external_id)?;

        let now = Utc::now();
        let mut tx = self.begin().await?;

        let user_row = query(
            "
            INSERT INTO users (external_id, email, role, is_active, created_at)
            VALUES ($1, $2, $3, true, $4)
            RETURNING id",
        )
        .bind(&new_user.external_id)
        .bind(&new_user.email)
        .bind(new_user.role.as_str())
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.conflict_or("user", "external_id", &new_user.external_id))?;

        let user_id: PrimaryKey = user_row.try_get("id").map_err(|e| e.any())?;

        let venue = Self::insert_venue(
            &mut tx,
            NewVenue {
                name: new_user.venue_name,
                owner_id: user_id,
                created_at: now,
            },
        )
        .await?;

        let row = query("UPDATE users SET venue_id = $1 WHERE id = $2 RETURNING *")
            .bind(venue.id)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())?;

        user_from_row(&row)
    }

    async fn venue_by_id(&self, venue_id: PrimaryKey) -> Result<VenueData> {
        let row = query("SELECT * FROM venues WHERE id = $1")
            .bind(venue_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("venue", "id"))?;

        venue_from_row(&row)
    }

    async fn create_venue(
        &self,
        new_venue: NewVenue,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData> {
        // Ensure the owner exists
        let _ = self.user_by_id(new_venue.owner_id).await?;

        let mut tx = self.begin().await?;
        let venue = Self::insert_venue(&mut tx, new_venue).await?;

        Self::insert_activity(
            &mut tx,
            NewActivityLogEntry {
                venue_id: Some(venue.id),
                ..entry
            },
        )
        .await?;

        tx.commit().await.map_err(|e| e.any())?;
        Ok(venue)
    }

    async fn commit_venue(
        &self,
        commit: VenueCommit,
        entry: NewActivityLogEntry,
    ) -> Result<VenueData> {
        let playback = commit.playback;
        let mut tx = self.begin().await?;

        let row = query(
            "
            UPDATE venues SET
                status = $3,
                now_playing = $4,
                current_time_seconds = $5,
                volume = $6,
                active_queue = $7,
                priority_queue = $8,
                history = $9,
                is_shuffled = $10,
                repeat_mode = $11,
                crossfade_seconds = $12,
                version = version + 1,
                last_updated_at = $13,
                last_command_id = $14
            WHERE id = $1 AND version = $2
            RETURNING *",
        )
        .bind(commit.id)
        .bind(commit.expected_version)
        .bind(playback.status.as_str())
        .bind(playback.now_playing.map(Json))
        .bind(playback.current_time_seconds)
        .bind(playback.volume as i16)
        .bind(Json(playback.active_queue))
        .bind(Json(playback.priority_queue))
        .bind(Json(playback.history))
        .bind(playback.is_shuffled)
        .bind(playback.player_settings.repeat_mode.as_str())
        .bind(playback.player_settings.crossfade_seconds)
        .bind(commit.updated_at)
        .bind(&commit.command_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        let Some(row) = row else {
            // Either the venue is gone or someone else wrote first
            drop(tx);
            let _ = self.venue_by_id(commit.id).await?;

            return Err(DatabaseError::Conflict {
                resource: "venue",
                field: "version",
                value: commit.expected_version.to_string(),
            });
        };

        let venue = venue_from_row(&row)?;
        Self::insert_activity(&mut tx, entry).await?;

        tx.commit().await.map_err(|e| e.any())?;
        Ok(venue)
    }

    async fn record_heartbeat(
        &self,
        venue_id: PrimaryKey,
        at: DateTime<Utc>,
    ) -> Result<VenueData> {
        let row = query(
            "
            UPDATE venues SET
                last_heartbeat_at = $2,
                status = CASE WHEN status IN ('idle', 'inactive') THEN 'ready' ELSE status END,
                version = CASE WHEN status IN ('idle', 'inactive') THEN version + 1 ELSE version END,
                last_updated_at = CASE WHEN status IN ('idle', 'inactive') THEN $2 ELSE last_updated_at END
            WHERE id = $1
            RETURNING *",
        )
        .bind(venue_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("venue", "id"))?;

        venue_from_row(&row)
    }

    async fn mark_stale_venues_inactive(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<Vec<VenueData>> {
        query(
            "
            UPDATE venues SET
                status = 'inactive',
                version = version + 1,
                last_updated_at = $2
            WHERE status <> 'inactive' AND last_heartbeat_at < $1
            RETURNING *",
        )
        .bind(cutoff)
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(venue_from_row)
        .collect()
    }

    async fn list_activity(
        &self,
        venue_id: PrimaryKey,
        limit: i64,
    ) -> Result<Vec<ActivityLogData>> {
        query(
            "
            SELECT * FROM activity_log
            WHERE venue_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2",
        )
        .bind(venue_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .iter()
        .map(activity_from_row)
        .collect()
    }

    async fn delete_activity_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        query("DELETE FROM activity_log WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|r| r.rows_affected())
    }
}

fn user_from_row(row: &PgRow) -> Result<UserData> {
    let role: String = row.try_get("role").map_err(|e| e.any())?;

    Ok(UserData {
        id: row.try_get("id").map_err(|e| e.any())?,
        external_id: row.try_get("external_id").map_err(|e| e.any())?,
        email: row.try_get("email").map_err(|e| e.any())?,
        venue_id: row.try_get("venue_id").map_err(|e| e.any())?,
        role: role.parse().map_err(|e: String| DatabaseError::Internal(e.into()))?,
        is_active: row.try_get("is_active").map_err(|e| e.any())?,
        created_at: row.try_get("created_at").map_err(|e| e.any())?,
    })
}

fn venue_from_row(row: &PgRow) -> Result<VenueData> {
    let status: String = row.try_get("status").map_err(|e| e.any())?;
    let repeat_mode: String = row.try_get("repeat_mode").map_err(|e| e.any())?;
    let volume: i16 = row.try_get("volume").map_err(|e| e.any())?;

    let now_playing: Option<Json<Track>> = row.try_get("now_playing").map_err(|e| e.any())?;
    let active_queue: Json<Vec<Track>> = row.try_get("active_queue").map_err(|e| e.any())?;
    let priority_queue: Json<Vec<Track>> = row.try_get("priority_queue").map_err(|e| e.any())?;
    let history: Json<Vec<Track>> = row.try_get("history").map_err(|e| e.any())?;

    let playback = PlaybackState {
        status: status
            .parse()
            .map_err(|e: String| DatabaseError::Internal(e.into()))?,
        now_playing: now_playing.map(|t| t.0),
        current_time_seconds: row.try_get("current_time_seconds").map_err(|e| e.any())?,
        volume: volume.clamp(0, 100) as u8,
        active_queue: active_queue.0,
        priority_queue: priority_queue.0,
        history: history.0,
        is_shuffled: row.try_get("is_shuffled").map_err(|e| e.any())?,
        player_settings: PlayerSettings {
            repeat_mode: repeat_mode
                .parse()
                .map_err(|e: String| DatabaseError::Internal(e.into()))?,
            crossfade_seconds: row.try_get("crossfade_seconds").map_err(|e| e.any())?,
        },
    };

    Ok(VenueData {
        id: row.try_get("id").map_err(|e| e.any())?,
        owner_id: row.try_get("owner_id").map_err(|e| e.any())?,
        name: row.try_get("name").map_err(|e| e.any())?,
        playback,
        version: row.try_get("version").map_err(|e| e.any())?,
        last_command_id: row.try_get("last_command_id").map_err(|e| e.any())?,
        last_heartbeat_at: row.try_get("last_heartbeat_at").map_err(|e| e.any())?,
        last_updated_at: row.try_get("last_updated_at").map_err(|e| e.any())?,
        created_at: row.try_get("created_at").map_err(|e| e.any())?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<ActivityLogData> {
    Ok(ActivityLogData {
        id: row.try_get("id").map_err(|e| e.any())?,
        user_id: row.try_get("user_id").map_err(|e| e.any())?,
        venue_id: row.try_get("venue_id").map_err(|e| e.any())?,
        event_type: row.try_get("event_type").map_err(|e| e.any())?,
        event_data: row.try_get("event_data").map_err(|e| e.any())?,
        created_at: row.try_get("created_at").map_err(|e| e.any())?,
    })
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        match self {
            SqlxError::PoolTimedOut | SqlxError::PoolClosed | SqlxError::Io(_) => {
                DatabaseError::Unavailable(self.to_string())
            }
            e => DatabaseError::Internal(Box::new(e)),
        }
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }

    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str) -> DatabaseError {
        match self {
            SqlxError::Database(e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            },
            e => Self::any(e),
        }
    }
}

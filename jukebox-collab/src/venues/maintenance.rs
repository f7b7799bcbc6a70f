use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jukebox_core::{CommandError, CommandResult};
use log::{error, info};
use tokio::{task::JoinHandle, time::timeout};

use crate::{rooms::room_name, CollabContext, VenueEvent};

/// What a single maintenance sweep did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    /// Venues that were marked inactive
    pub deactivated: usize,
    /// Activity entries that were past retention
    pub purged_activity: u64,
}

/// Periodically marks silent venues inactive and purges old activity.
///
/// Does not take the per-venue command lock, a command racing a sweep
/// sees a version conflict and retries.
pub struct Maintenance {
    context: CollabContext,
}

impl Maintenance {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Runs a single sweep as of `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> CommandResult<SweepReport> {
        let config = &self.context.config;
        let database = &self.context.database;

        let heartbeat_cutoff = now - Duration::seconds(config.heartbeat_timeout_in_seconds as i64);
        let retention_cutoff = now - Duration::days(config.activity_retention_in_days as i64);

        let stale = self
            .bounded(database.mark_stale_venues_inactive(heartbeat_cutoff, now))
            .await?;

        for venue in &stale {
            info!(
                "{} missed its heartbeat since {}, marked inactive",
                room_name(venue.id),
                venue.last_heartbeat_at
            );

            self.context
                .broadcaster
                .publish(VenueEvent::StateUpdate(Arc::new(venue.clone())));
        }

        let purged_activity = self
            .bounded(database.delete_activity_before(retention_cutoff))
            .await?;

        if purged_activity > 0 {
            info!("Purged {} activity entries past retention", purged_activity);
        }

        Ok(SweepReport {
            deactivated: stale.len(),
            purged_activity,
        })
    }

    /// Spawns the periodic sweep onto the runtime
    pub fn spawn(self) -> JoinHandle<()> {
        let period = self.context.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                if let Err(e) = self.sweep(Utc::now()).await {
                    error!("Maintenance sweep failed: {}", e);
                }
            }
        })
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = crate::Result<T>>,
    ) -> CommandResult<T> {
        timeout(self.context.config.store_timeout(), call)
            .await
            .map_err(|_| CommandError::StoreUnavailable("maintenance store call timed out".to_string()))?
            .map_err(CommandError::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use jukebox_core::VenueStatus;
    use serde_json::json;

    use super::super::tests::{setup, track};
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_silent_venue_goes_inactive_and_wakes_on_heartbeat() {
        let s = setup().await;
        let venues = &s.collab.venues;
        let maintenance = Maintenance::new(s.collab.context());

        let command = jukebox_core::Command::parse(
            "play_track",
            json!({ "track": serde_json::to_value(track("Alpha")).unwrap() }),
        )
        .unwrap();

        venues.apply(s.venue_id, command, &s.owner).await.unwrap();

        let client = s.collab.registry().connect(s.owner.id);
        venues.join(client.id(), s.venue_id).await.unwrap();
        client.try_next();

        let later = Utc::now() + Duration::seconds(61);
        let report = maintenance.sweep(later).await.unwrap();

        // Both provisioned venues went silent
        assert_eq!(report.deactivated, 2);

        let venue = venues.venue(s.venue_id).await.unwrap();
        assert_eq!(venue.playback.status, VenueStatus::Inactive);
        assert_eq!(
            venue.playback.now_playing,
            Some(track("Alpha")),
            "sweep keeps what was playing"
        );
        assert!(
            matches!(client.try_next(), Some(VenueEvent::StateUpdate(v)) if v.playback.status == VenueStatus::Inactive)
        );

        let report = maintenance.sweep(later).await.unwrap();
        assert_eq!(report.deactivated, 0, "inactive venues are left alone");

        let venue = venues.heartbeat(s.venue_id, &s.owner).await.unwrap();
        assert_eq!(venue.playback.status, VenueStatus::Ready);
    }

    #[tokio::test]
    async fn test_recent_heartbeat_keeps_venue() {
        let s = setup().await;
        let maintenance = Maintenance::new(s.collab.context());

        s.db.record_heartbeat(s.venue_id, Utc::now()).await.unwrap();

        let report = maintenance.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.deactivated, 0);
    }

    #[tokio::test]
    async fn test_old_activity_is_purged() {
        let s = setup().await;
        let maintenance = Maintenance::new(s.collab.context());

        s.collab
            .venues
            .create_venue(&s.owner, "Basement")
            .await
            .unwrap();

        let report = maintenance
            .sweep(Utc::now() + Duration::days(31))
            .await
            .unwrap();

        assert_eq!(report.purged_activity, 1);
        assert!(s.db.all_activity().is_empty());
    }
}

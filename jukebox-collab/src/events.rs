use std::sync::Arc;

use jukebox_core::QueueInsert;

use crate::{PrimaryKey, VenueData};

/// Events delivered to clients joined to a venue's room
#[derive(Debug, Clone)]
pub enum VenueEvent {
    /// The newest known state, sent first when a client joins
    Snapshot(Arc<VenueData>),
    /// The venue's state changed
    StateUpdate(Arc<VenueData>),
    /// A track was inserted into one of the venue's queues.
    /// Always followed by a [VenueEvent::StateUpdate] of the same version.
    QueueInsert {
        venue_id: PrimaryKey,
        version: i64,
        insert: QueueInsert,
    },
}

impl VenueEvent {
    pub fn venue_id(&self) -> PrimaryKey {
        match self {
            Self::Snapshot(venue) | Self::StateUpdate(venue) => venue.id,
            Self::QueueInsert { venue_id, .. } => *venue_id,
        }
    }

    /// The venue version this event was produced at
    pub fn version(&self) -> i64 {
        match self {
            Self::Snapshot(venue) | Self::StateUpdate(venue) => venue.version,
            Self::QueueInsert { version, .. } => *version,
        }
    }
}

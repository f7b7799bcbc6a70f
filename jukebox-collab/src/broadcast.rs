use std::sync::Arc;

use dashmap::DashMap;
use log::debug;

use crate::{
    rooms::{room_name, ClientId, RoomRegistry},
    PrimaryKey, VenueData, VenueEvent,
};

/// Pushes venue events to the clients joined to each venue's room.
///
/// Publishing for a venue is serialized, and an event older than the newest
/// version already published for its venue is dropped. The newest state is
/// kept so that joining clients start from a snapshot.
pub struct Broadcaster {
    registry: Arc<RoomRegistry>,
    cursors: DashMap<PrimaryKey, Cursor>,
}

#[derive(Default)]
struct Cursor {
    version: i64,
    venue: Option<Arc<VenueData>>,
}

impl Broadcaster {
    pub fn new(registry: &Arc<RoomRegistry>) -> Self {
        Self {
            registry: registry.clone(),
            cursors: Default::default(),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Delivers the event to the venue's room, returns false if it was stale
    pub fn publish(&self, event: VenueEvent) -> bool {
        let venue_id = event.venue_id();

        // Held until delivery is done, which orders publishes per venue
        let mut cursor = self.cursors.entry(venue_id).or_default();

        if event.version() < cursor.version {
            debug!(
                "Dropped stale event for {} at version {}, already at {}",
                room_name(venue_id),
                event.version(),
                cursor.version
            );
            return false;
        }

        cursor.version = event.version();

        if let VenueEvent::StateUpdate(venue) | VenueEvent::Snapshot(venue) = &event {
            cursor.venue = Some(venue.clone());
        }

        self.registry.deliver(&event);
        true
    }

    /// Joins the client to the venue's room and queues a snapshot of the newest known state.
    ///
    /// Returns false if the client is no longer connected.
    pub fn subscribe(&self, client_id: ClientId, venue: VenueData) -> bool {
        let mut cursor = self.cursors.entry(venue.id).or_default();

        let newest = match &cursor.venue {
            Some(known) if known.version >= venue.version => known.clone(),
            _ => {
                let venue = Arc::new(venue);

                cursor.version = cursor.version.max(venue.version);
                cursor.venue = Some(venue.clone());
                venue
            }
        };

        if !self.registry.join(client_id, newest.id) {
            return false;
        }

        self.registry
            .send(client_id, VenueEvent::Snapshot(newest))
    }

    /// The newest state published for a venue, if any
    #[cfg(test)]
    fn latest(&self, venue_id: PrimaryKey) -> Option<Arc<VenueData>> {
        self.cursors
            .get(&venue_id)
            .and_then(|cursor| cursor.venue.clone())
    }
}

mod connection;

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use log::{debug, info};

use crate::{PrimaryKey, VenueEvent};

pub use connection::*;

/// The name of the room clients of a venue are joined to
pub fn room_name(venue_id: PrimaryKey) -> String {
    format!("venue:{}", venue_id)
}

/// Tracks connected clients and the venue rooms they are joined to.
///
/// The registry does not authorize anything, callers decide who may join.
pub struct RoomRegistry {
    me: Weak<Self>,
    outbox_capacity: usize,
    clients: DashMap<ClientId, ClientEntry>,
    rooms: DashMap<PrimaryKey, HashSet<ClientId>>,
}

struct ClientEntry {
    client: Client,
    rooms: HashSet<PrimaryKey>,
}

impl RoomRegistry {
    pub fn new(outbox_capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            outbox_capacity,
            clients: Default::default(),
            rooms: Default::default(),
        })
    }

    /// Registers a client, returning the handle its events are read from
    pub fn connect(&self, user_id: PrimaryKey) -> ClientHandle {
        let client = Client {
            id: ClientId::new(),
            user_id,
            outbox: Arc::new(Outbox::new(self.outbox_capacity)),
        };

        let handle = ClientHandle::new(&client, self.me.clone());
        debug!("Client {} connected for user {}", client.id, user_id);

        self.clients.insert(
            client.id,
            ClientEntry {
                client,
                rooms: Default::default(),
            },
        );

        handle
    }

    /// Adds the client to a venue's room. Returns false if the client is not connected.
    pub fn join(&self, client_id: ClientId, venue_id: PrimaryKey) -> bool {
        // Never hold a guard on both maps at once
        let joined = match self.clients.get_mut(&client_id) {
            Some(mut entry) => entry.rooms.insert(venue_id),
            None => return false,
        };

        self.rooms.entry(venue_id).or_default().insert(client_id);

        // The client may have disconnected before it was added to the room
        if !self.clients.contains_key(&client_id) {
            self.remove_member(venue_id, client_id);
            return false;
        }

        if joined {
            info!("Client {} joined {}", client_id, room_name(venue_id));
        }

        true
    }

    /// Removes the client from a venue's room. Returns false if it wasn't in it.
    pub fn leave(&self, client_id: ClientId, venue_id: PrimaryKey) -> bool {
        let was_joined = self
            .clients
            .get_mut(&client_id)
            .map(|mut entry| entry.rooms.remove(&venue_id))
            .unwrap_or(false);

        self.remove_member(venue_id, client_id);

        if was_joined {
            info!("Client {} left {}", client_id, room_name(venue_id));
        }

        was_joined
    }

    /// Returns the clients joined to a venue's room
    pub fn members(&self, venue_id: PrimaryKey) -> Vec<ClientId> {
        self.rooms
            .get(&venue_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the venues a client is joined to
    pub fn rooms_of(&self, client_id: ClientId) -> Vec<PrimaryKey> {
        let mut rooms: Vec<_> = self
            .clients
            .get(&client_id)
            .map(|entry| entry.rooms.iter().copied().collect())
            .unwrap_or_default();

        rooms.sort();
        rooms
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Queues an event for a single client
    pub fn send(&self, client_id: ClientId, event: VenueEvent) -> bool {
        let outbox = self
            .clients
            .get(&client_id)
            .map(|entry| entry.client.outbox.clone());

        outbox.map(|o| o.push(event)).unwrap_or(false)
    }

    /// Queues an event for every client joined to the event's venue, returning how many got it
    pub fn deliver(&self, event: &VenueEvent) -> usize {
        let members = self.members(event.venue_id());

        members
            .into_iter()
            .filter(|id| self.send(*id, event.clone()))
            .count()
    }

    /// Called when a [ClientHandle] is dropped
    pub fn disconnect(&self, client_id: ClientId) {
        let Some((_, entry)) = self.clients.remove(&client_id) else {
            return;
        };

        entry.client.outbox.close();

        for venue_id in entry.rooms {
            self.remove_member(venue_id, client_id);
        }

        debug!("Client {} disconnected", client_id);
    }

    fn remove_member(&self, venue_id: PrimaryKey, client_id: ClientId) {
        if let Some(mut members) = self.rooms.get_mut(&venue_id) {
            members.remove(&client_id);
        }

        self.rooms.remove_if(&venue_id, |_, members| members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use futures_util::StreamExt;
    use jukebox_core::PlaybackState;

    use super::*;
    use crate::VenueData;

    fn update(venue_id: PrimaryKey, version: i64) -> VenueEvent {
        let now = Utc::now();

        VenueEvent::StateUpdate(Arc::new(VenueData {
            id: venue_id,
            owner_id: 1,
            name: "Venue".to_string(),
            playback: PlaybackState::default(),
            version,
            last_command_id: None,
            last_heartbeat_at: now,
            last_updated_at: now,
            created_at: now,
        }))
    }

    #[test]
    fn test_join_and_leave() {
        let registry = RoomRegistry::new(8);
        let handle = registry.connect(1);

        assert!(registry.join(handle.id(), 10));
        assert!(registry.join(handle.id(), 11));
        assert_eq!(registry.rooms_of(handle.id()), vec![10, 11]);
        assert_eq!(registry.members(10), vec![handle.id()]);

        assert!(registry.leave(handle.id(), 10));
        assert!(!registry.leave(handle.id(), 10), "second leave is a no-op");
        assert!(registry.members(10).is_empty());
        assert_eq!(registry.rooms_of(handle.id()), vec![11]);
    }

    #[test]
    fn test_dropping_handle_leaves_every_room() {
        let registry = RoomRegistry::new(8);
        let handle = registry.connect(1);
        let id = handle.id();

        registry.join(id, 10);
        registry.join(id, 11);
        drop(handle);

        assert_eq!(registry.client_count(), 0);
        assert!(registry.members(10).is_empty());
        assert!(registry.members(11).is_empty());
        assert!(!registry.join(id, 12), "disconnected clients cannot join");
    }

    #[test]
    fn test_join_racing_disconnect_leaves_no_member() {
        let registry = RoomRegistry::new(8);

        for _ in 0..200 {
            let handle = registry.connect(1);
            let id = handle.id();

            let joiner = {
                let registry = registry.clone();
                std::thread::spawn(move || registry.join(id, 10))
            };

            drop(handle);
            let _ = joiner.join().unwrap();

            assert!(registry.members(10).is_empty());
        }

        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn test_delivery_is_isolated_per_venue() {
        let registry = RoomRegistry::new(8);
        let in_x = registry.connect(1);
        let in_y = registry.connect(2);

        registry.join(in_x.id(), 10);
        registry.join(in_y.id(), 20);

        assert_eq!(registry.deliver(&update(10, 2)), 1);

        assert_eq!(in_x.try_next().map(|e| e.venue_id()), Some(10));
        assert!(in_y.try_next().is_none(), "venue 20 never sees venue 10");
    }

    #[test]
    fn test_full_outbox_drops_oldest() {
        let registry = RoomRegistry::new(2);
        let handle = registry.connect(1);
        registry.join(handle.id(), 10);

        for version in 1..=3 {
            registry.deliver(&update(10, version));
        }

        let versions: Vec<_> = std::iter::from_fn(|| handle.try_next())
            .map(|e| e.version())
            .collect();

        assert_eq!(versions, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_stream_wakes_on_delivery() {
        let registry = RoomRegistry::new(8);
        let mut handle = registry.connect(1);
        registry.join(handle.id(), 10);

        let sender = registry.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            sender.deliver(&update(10, 5));
        });

        let event = handle.next().await.expect("stream yields the event");
        assert_eq!(event.version(), 5);
    }
}

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll, Waker},
};

use futures_util::Stream;
use jukebox_core::Id;
use log::debug;
use parking_lot::Mutex;

use crate::{PrimaryKey, VenueEvent};

use super::RoomRegistry;

pub type ClientId = Id<Client>;

/// A connected realtime client, joined to zero or more venue rooms
#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub user_id: PrimaryKey,
    pub(super) outbox: Arc<Outbox>,
}

/// Pending events for a single client.
///
/// Bounded, once full the oldest event is dropped to make room. Every state
/// event carries the full state, so a dropped event is superseded by a later one.
#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    state: Mutex<OutboxState>,
}

#[derive(Debug, Default)]
struct OutboxState {
    events: VecDeque<VenueEvent>,
    waker: Option<Waker>,
    closed: bool,
}

impl Outbox {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Default::default(),
        }
    }

    /// Queues an event without blocking, returns false if the client is gone.
    pub(super) fn push(&self, event: VenueEvent) -> bool {
        let mut state = self.state.lock();

        if state.closed {
            return false;
        }

        if state.events.len() >= self.capacity {
            let dropped = state.events.pop_front();
            debug!(
                "Outbox full, dropped event for venue {:?}",
                dropped.map(|e| e.venue_id())
            );
        }

        state.events.push_back(event);

        if let Some(waker) = state.waker.take() {
            waker.wake()
        }

        true
    }

    pub(super) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;

        if let Some(waker) = state.waker.take() {
            waker.wake()
        }
    }
}

/// A handle to a client's event stream, which when dropped leaves every room
pub struct ClientHandle {
    id: ClientId,
    user_id: PrimaryKey,
    outbox: Arc<Outbox>,
    /// Required to remove the client when dropped
    registry: Weak<RoomRegistry>,
}

impl ClientHandle {
    pub(super) fn new(client: &Client, registry: Weak<RoomRegistry>) -> Self {
        Self {
            id: client.id,
            user_id: client.user_id,
            outbox: client.outbox.clone(),
            registry,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user_id(&self) -> PrimaryKey {
        self.user_id
    }

    /// Takes the next pending event without waiting
    pub fn try_next(&self) -> Option<VenueEvent> {
        self.outbox.state.lock().events.pop_front()
    }
}

impl Stream for ClientHandle {
    type Item = VenueEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut state = self.outbox.state.lock();

        if let Some(event) = state.events.pop_front() {
            return Poll::Ready(Some(event));
        }

        if state.closed {
            return Poll::Ready(None);
        }

        // Registered under the same lock the sender takes, so no wake is lost
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.disconnect(self.id)
        }
    }
}

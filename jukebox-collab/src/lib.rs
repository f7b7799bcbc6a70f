mod auth;
mod broadcast;
mod db;
mod events;
mod venues;

pub mod rooms;

use std::sync::Arc;

pub use auth::*;
pub use broadcast::*;
pub use db::*;
pub use events::*;
pub use venues::*;

use jukebox_core::Config;
use rooms::RoomRegistry;

/// The jukebox collab system, facilitating venues, authentication, and realtime rooms.
pub struct Collab {
    context: CollabContext,

    pub auth: Auth,
    pub venues: VenueManager,
}

/// A type passed to various components of the collab system, to access state and broadcast events.
#[derive(Clone)]
pub struct CollabContext {
    pub database: Arc<dyn Database>,
    pub config: Arc<Config>,
    pub broadcaster: Arc<Broadcaster>,
}

impl Collab {
    pub fn new(
        database: Arc<dyn Database>,
        identity: Arc<dyn IdentityProvider>,
        config: Config,
    ) -> Self {
        let registry = RoomRegistry::new(config.client_buffer_size);

        let context = CollabContext {
            broadcaster: Arc::new(Broadcaster::new(&registry)),
            config: Arc::new(config),
            database,
        };

        Self {
            auth: Auth::new(&context.database, identity),
            venues: VenueManager::new(&context),
            context,
        }
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.context.broadcaster.registry()
    }

    /// Starts the periodic maintenance sweep
    pub fn start_maintenance(&self) -> tokio::task::JoinHandle<()> {
        Maintenance::new(&self.context).spawn()
    }
}

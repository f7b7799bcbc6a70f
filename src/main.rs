use std::sync::Arc;

use colored::Colorize;
use config::{AppConfig, ConfigError};
use jukebox_collab::{
    AuthError, Collab, Database, DatabaseError, IdentityProvider, MemoryDatabase, PgDatabase,
    RemoteIdentityProvider, StaticIdentityProvider,
};
use jukebox_server::ServerContext;
use log::{error, info, warn};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

use crate::logging::LogColor;

mod config;
mod logging;

pub struct Jukebox {
    config: AppConfig,
    collab: Collab,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum JukeboxError {
    #[error("Could not load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),

    #[error("Could not set up the identity provider: {0}")]
    Identity(#[from] AuthError),

    #[error("Server stopped: {0}")]
    Server(std::io::Error),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Jukebox {
    fn new() -> Result<Self, JukeboxError> {
        let config = AppConfig::load()?;

        info!("Building async runtime...");
        let main_runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("jukebox-async")
            .build()
            .map_err(|e| JukeboxError::Fatal(e.to_string()))?;

        let database: Arc<dyn Database> = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                Arc::new(main_runtime.block_on(PgDatabase::new(url))?)
            }
            None => {
                warn!("No database configured, venues will not outlive this process");
                Arc::new(MemoryDatabase::new())
            }
        };

        let identity: Arc<dyn IdentityProvider> = match &config.identity_url {
            Some(url) => Arc::new(RemoteIdentityProvider::new(url)?),
            None => {
                warn!(
                    "No identity provider configured, accepting {} development credential(s)",
                    config.dev_users.len()
                );

                let provider = config
                    .dev_users
                    .iter()
                    .fold(StaticIdentityProvider::new(), |provider, user| {
                        provider.with(user.token.clone(), user.identity())
                    });

                Arc::new(provider)
            }
        };

        let collab = Collab::new(database, identity, config.sync.clone());

        Ok(Self {
            config,
            collab,
            runtime: main_runtime,
        })
    }

    fn run(self) -> Result<(), JukeboxError> {
        let Self {
            config,
            collab,
            runtime,
        } = self;

        runtime.block_on(async move {
            let maintenance = collab.start_maintenance();
            let context = ServerContext::new(collab);

            let result = jukebox_server::run_server(context, config.server_port).await;

            maintenance.abort();
            result.map_err(JukeboxError::Server)
        })
    }
}

impl JukeboxError {
    fn hint(&self) -> String {
        match self {
            JukeboxError::Config(_) => "Check the file named by JUKEBOX_CONFIG (jukebox.ron by default) and the JUKEBOX_* environment variables.".to_string(),
            JukeboxError::Database(_) => "This is a database error. Make sure the Postgres instance in JUKEBOX_DATABASE_URL is running and reachable, then try again.".to_string(),
            JukeboxError::Identity(_) => "Make sure JUKEBOX_IDENTITY_URL is a valid url.".to_string(),
            JukeboxError::Server(_) => "Make sure the port is not already in use.".to_string(),
            JukeboxError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("Could not initialize logging: {}", e);
    }

    let result = Jukebox::new().and_then(|jukebox| {
        info!("Initialized successfully.");
        jukebox.run()
    });

    if let Err(error) = result {
        error!(
            "{} Read the error below to troubleshoot the issue.",
            "Jukebox failed to start!".bold().color(LogColor::RED)
        );
        error!("{}", error);
        error!(
            "{}",
            format!("Hint: {}", error.hint())
                .color(LogColor::DIMMED)
                .italic()
        );
    }
}

use std::{env, fs, io, path::PathBuf};

use jukebox_collab::{Identity, Role};
use jukebox_core::{Config, InvalidConfig};
use serde::Deserialize;
use thiserror::Error;

const CONFIG_PATH_VARIABLE: &str = "JUKEBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "jukebox.ron";

const PORT_VARIABLE: &str = "JUKEBOX_SERVER_PORT";
const DATABASE_URL_VARIABLE: &str = "JUKEBOX_DATABASE_URL";
const IDENTITY_URL_VARIABLE: &str = "JUKEBOX_IDENTITY_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: ron::error::SpannedError,
    },

    #[error("{name} has an invalid value {value:?}")]
    InvalidVariable { name: &'static str, value: String },

    #[error("Invalid sync settings: {0}")]
    Invalid(#[from] InvalidConfig),
}

/// Everything needed to start jukebox
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_port: u16,
    /// Postgres connection string, an in-memory store is used without one
    pub database_url: Option<String>,
    /// Base url of the identity provider
    pub identity_url: Option<String>,
    /// Fixed credentials, only used when no identity provider is configured
    pub dev_users: Vec<DevUser>,
    pub sync: Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevUser {
    pub token: String,
    pub external_id: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
}

impl DevUser {
    pub fn identity(&self) -> Identity {
        Identity {
            external_id: self.external_id.clone(),
            email: self.email.clone(),
            role: if self.admin { Role::Admin } else { Role::User },
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: jukebox_server::DEFAULT_PORT,
            database_url: None,
            identity_url: None,
            dev_users: vec![],
            sync: Config::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config file if it exists, then applies environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path: PathBuf = env::var(CONFIG_PATH_VARIABLE)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
            .into();

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => Some(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config = match contents {
            Some(contents) => {
                ron::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Self::default(),
        };

        let config = config.with_overrides(|name| env::var(name).ok())?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sync.validate().map_err(ConfigError::from)
    }

    fn with_overrides<F>(mut self, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = var(PORT_VARIABLE) {
            self.server_port = value
                .parse()
                .map_err(|_| ConfigError::InvalidVariable {
                    name: PORT_VARIABLE,
                    value,
                })?;
        }

        if let Some(url) = var(DATABASE_URL_VARIABLE).filter(|x| !x.is_empty()) {
            self.database_url = Some(url);
        }

        if let Some(url) = var(IDENTITY_URL_VARIABLE).filter(|x| !x.is_empty()) {
            self.identity_url = Some(url);
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parses_partial_file() {
        let config: AppConfig = ron::from_str(
            r#"(
                server_port: 8080,
                dev_users: [
                    (token: "dev", external_id: "dev-1", email: "dev@example.com", admin: true),
                ],
                sync: (max_queue_size: 20),
            )"#,
        )
        .unwrap();

        assert_eq!(config.server_port, 8080);
        assert_eq!(config.database_url, None);
        assert_eq!(config.sync.max_queue_size, 20);
        assert_eq!(config.sync.history_size, Config::default().history_size);
        assert_eq!(config.dev_users[0].identity().role, Role::Admin);
    }

    #[test]
    fn test_environment_overrides_file() {
        let config = AppConfig::default()
            .with_overrides(vars(&[
                (PORT_VARIABLE, "7000"),
                (DATABASE_URL_VARIABLE, "postgres://localhost/jukebox"),
                (IDENTITY_URL_VARIABLE, ""),
            ]))
            .unwrap();

        assert_eq!(config.server_port, 7000);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/jukebox")
        );
        assert_eq!(config.identity_url, None, "empty values are ignored");
    }

    #[test]
    fn test_rejects_zero_sweep_interval() {
        let config: AppConfig = ron::from_str("(sync: (sweep_interval_in_seconds: 0))").unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(InvalidConfig { field })) if field == "sweep_interval_in_seconds"
        ));
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_port() {
        let result = AppConfig::default().with_overrides(vars(&[(PORT_VARIABLE, "nope")]));

        assert!(matches!(
            result,
            Err(ConfigError::InvalidVariable { name, .. }) if name == PORT_VARIABLE
        ));
    }
}

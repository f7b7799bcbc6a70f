use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// The configuration of venue synchronization
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many previously played tracks are kept for `previous`
    pub history_size: usize,
    /// How many tracks a single queue may hold
    pub max_queue_size: usize,
    /// How long a venue may go without a heartbeat before it is marked inactive
    pub heartbeat_timeout_in_seconds: u64,
    /// How often stale venues and old activity entries are swept
    pub sweep_interval_in_seconds: u64,
    /// How long activity log entries are kept
    pub activity_retention_in_days: u32,
    /// How long a single store call may take before it is considered unavailable
    pub store_timeout_in_millis: u64,
    /// How many times a retryable store failure is retried before surfacing
    pub store_retry_limit: u32,
    /// Base delay between retries, multiplied by the attempt number
    pub retry_backoff_in_millis: u64,
    /// How many undelivered messages a client may have pending
    pub client_buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field} must be greater than zero")]
pub struct InvalidConfig {
    pub field: &'static str,
}

impl Config {
    /// Rejects values the service cannot run with
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        let required = [
            ("max_queue_size", self.max_queue_size as u64),
            ("heartbeat_timeout_in_seconds", self.heartbeat_timeout_in_seconds),
            ("sweep_interval_in_seconds", self.sweep_interval_in_seconds),
            ("store_timeout_in_millis", self.store_timeout_in_millis),
            ("client_buffer_size", self.client_buffer_size as u64),
        ];

        match required.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(InvalidConfig { field }),
            None => Ok(()),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_in_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_in_seconds)
    }

    pub fn activity_retention(&self) -> Duration {
        Duration::from_secs(self.activity_retention_in_days as u64 * 24 * 60 * 60)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_in_millis)
    }

    /// Returns the delay before the given retry attempt, starting at 1
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_in_millis * attempt as u64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history_size: 50,
            max_queue_size: 500,
            // Players send a heartbeat every 15 seconds, so this allows a few to be missed
            heartbeat_timeout_in_seconds: 60,
            sweep_interval_in_seconds: 30,
            activity_retention_in_days: 30,
            store_timeout_in_millis: 5000,
            store_retry_limit: 3,
            retry_backoff_in_millis: 100,
            client_buffer_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        let config = Config::default();

        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.activity_retention(),
            Duration::from_secs(30 * 86400),
            "retention is in days"
        );
        assert_eq!(config.retry_backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "history_size": 5 }"#).expect("config deserializes");

        assert_eq!(config.history_size, 5);
        assert_eq!(config.max_queue_size, 500, "missing fields are defaulted");
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        assert_eq!(Config::default().validate(), Ok(()));

        let config = Config {
            sweep_interval_in_seconds: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(InvalidConfig {
                field: "sweep_interval_in_seconds"
            })
        );

        let config = Config {
            store_timeout_in_millis: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().map_err(|e| e.to_string()),
            Err("store_timeout_in_millis must be greater than zero".to_string())
        );
    }
}

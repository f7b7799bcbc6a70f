use thiserror::Error;

use crate::VenueStatus;

pub type CommandResult<T> = Result<T, CommandError>;

/// Everything that can go wrong when a command is applied to a venue.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// A required field is missing or malformed
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("{resource}:{identifier} not found")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// A queue index or position is outside of the queue
    #[error("Index {index} is out of range for a queue of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// The credential is missing, invalid, or lacks permission
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The command does not apply in the venue's current status
    #[error("Cannot {command} while the venue is {status}")]
    InvalidTransition {
        command: &'static str,
        status: VenueStatus,
    },
    #[error("Queue is full, the limit is {limit} tracks")]
    QueueFull { limit: usize },
    /// A transient infrastructure failure, safe to retry
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    /// The venue was written concurrently, retry with a fresh read
    #[error("Conflicting write: {0}")]
    Conflict(String),
}

impl CommandError {
    /// Returns true if the failed operation may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Conflict(_))
    }

    /// A stable name for the kind of error, exposed to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::NotFound { .. } => "NotFound",
            Self::OutOfRange { .. } => "OutOfRange",
            Self::UnknownCommand(_) => "UnknownCommand",
            Self::Unauthorized(_) => "Unauthorized",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::QueueFull { .. } => "QueueFull",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::Conflict(_) => "Conflict",
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }
}

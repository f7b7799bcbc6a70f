use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jukebox_collab::AuthError;
use jukebox_core::CommandError;
use thiserror::Error;

use crate::serialized::ErrorBody;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing authorization")]
    MissingCredentials,
    #[error("Authorization must be Bearer")]
    MalformedCredentials,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User is not active")]
    Inactive,
    /// The request body could not be parsed or failed validation
    #[error("Request body is invalid: {0}")]
    InvalidBody(String),
    #[error("Identity provider is unavailable: {0}")]
    IdentityUnavailable(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::MalformedCredentials | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Inactive => StatusCode::FORBIDDEN,
            Self::IdentityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Command(e) => match e {
                CommandError::InvalidPayload(_)
                | CommandError::OutOfRange { .. }
                | CommandError::UnknownCommand(_)
                | CommandError::QueueFull { .. } => StatusCode::BAD_REQUEST,
                CommandError::Unauthorized(_) => StatusCode::FORBIDDEN,
                CommandError::NotFound { .. } => StatusCode::NOT_FOUND,
                CommandError::InvalidTransition { .. } | CommandError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                CommandError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    /// A stable name for the kind of error, exposed to clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials
            | Self::MalformedCredentials
            | Self::InvalidCredentials
            | Self::Inactive => "Unauthorized",
            Self::InvalidBody(_) => "InvalidPayload",
            Self::IdentityUnavailable(_) => "IdentityUnavailable",
            Self::Command(e) => e.kind(),
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            error: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.as_status_code(), Json(self.to_body())).into_response()
    }
}

impl From<AuthError> for ServerError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::InvalidCredentials => Self::InvalidCredentials,
            AuthError::Inactive => Self::Inactive,
            AuthError::Unavailable(reason) => Self::IdentityUnavailable(reason),
            AuthError::Db(e) => Self::Command(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use jukebox_core::VenueStatus;

    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (CommandError::invalid_payload("x"), StatusCode::BAD_REQUEST),
            (CommandError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (
                CommandError::NotFound {
                    resource: "venue",
                    identifier: "id".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                CommandError::InvalidTransition {
                    command: "pause",
                    status: VenueStatus::Idle,
                },
                StatusCode::CONFLICT,
            ),
            (
                CommandError::StoreUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ServerError::from(error).as_status_code(), status);
        }

        assert_eq!(
            ServerError::MissingCredentials.as_status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_body_names_the_error() {
        let body = ServerError::from(CommandError::QueueFull { limit: 500 }).to_body();

        assert!(!body.success);
        assert_eq!(body.error, "QueueFull");
        assert!(body.message.contains("500"));
    }
}

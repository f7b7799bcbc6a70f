use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::ServerError;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiCommandSchema {
    /// The command name, such as `play_track` or `add_to_queue`
    #[validate(length(min = 1, max = 64))]
    pub command: String,
    pub venue_id: i32,
    /// If present, must be the external id of the authenticated user
    #[validate(length(min = 1, max = 128))]
    pub user_id: Option<String>,
    /// The command payload
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewVenueSchema {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityQuery {
    /// How many entries to return, at most 100
    pub limit: Option<i64>,
}

/// Messages sent by realtime clients
#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinVenue {
        #[serde(rename = "venueId")]
        venue_id: i32,
    },
    LeaveVenue {
        #[serde(rename = "venueId")]
        venue_id: i32,
    },
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::InvalidBody(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::InvalidBody(e.to_string()))?;

        Ok(Self(extracted_json.0))
    }
}

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{header, request::Parts},
    routing::get,
    Json,
};
use jukebox_collab::UserData;
use serde::Deserialize;

use crate::{
    context::ServerContext,
    errors::ServerError,
    serialized::{Account, ErrorBody, ToSerialized},
    Router,
};

/// The authenticated user of a request
pub struct Session {
    pub user: UserData,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Reads the credential from the Authorization header, or the `token` query parameter.
///
/// Browsers cannot set headers on websocket or event source requests, hence the parameter.
fn credential(parts: &Parts) -> Result<String, ServerError> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| ServerError::MalformedCredentials)?;

        let parts: Vec<_> = value.split_ascii_whitespace().collect();

        return match parts.as_slice() {
            ["Bearer", token] => Ok(token.to_string()),
            _ => Err(ServerError::MalformedCredentials),
        };
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|q| q.0.token)
        .filter(|t| !t.is_empty())
        .ok_or(ServerError::MissingCredentials)
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let token = credential(parts)?;
        let user = state.collab.auth.authenticate(&token).await?;

        Ok(Self { user })
    }
}

#[utoipa::path(
    get,
    path = "/v1/account",
    tag = "account",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Account),
        (status = 401, body = ErrorBody)
    )
)]
async fn account(session: Session) -> Json<Account> {
    Json(session.user.to_serialized())
}

pub fn router() -> Router {
    Router::new().route("/account", get(account))
}

use axum::{routing::post, Json};
use jukebox_core::{Command, CommandError};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{UiCommandSchema, ValidatedJson},
    serialized::{CommandResponse, ErrorBody},
    Router,
};

#[utoipa::path(
    post,
    path = "/api/ui-command",
    tag = "commands",
    request_body = UiCommandSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = CommandResponse),
        (status = 400, description = "The payload is invalid or the command is unknown", body = ErrorBody),
        (status = 401, description = "The credential is missing or invalid", body = ErrorBody),
        (status = 403, description = "The user may not send this command to the venue", body = ErrorBody),
        (status = 404, description = "The venue does not exist", body = ErrorBody),
        (status = 409, description = "The command does not apply in the current status", body = ErrorBody),
        (status = 503, description = "The store is unavailable, try again", body = ErrorBody)
    )
)]
async fn ui_command(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<UiCommandSchema>,
) -> ServerResult<Json<CommandResponse>> {
    if let Some(user_id) = &body.user_id {
        if *user_id != session.user.external_id {
            return Err(CommandError::Unauthorized(
                "userId does not match the authenticated user".to_string(),
            )
            .into());
        }
    }

    let command = Command::parse(&body.command, body.data)?;

    let outcome = context
        .collab
        .venues
        .apply(body.venue_id, command, &session.user)
        .await?;

    Ok(Json(CommandResponse {
        success: true,
        command: body.command,
        venue_id: outcome.venue.id,
        version: outcome.venue.version,
        timestamp: outcome.timestamp,
    }))
}

pub fn router() -> Router {
    Router::new().route("/ui-command", post(ui_command))
}

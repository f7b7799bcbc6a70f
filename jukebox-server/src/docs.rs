use std::borrow::BorrowMut;

use axum::{response::IntoResponse, Json};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{auth, commands, realtime, schemas, serialized, sse, venues};

#[derive(OpenApi)]
#[openapi(
    paths(
        commands::ui_command,
        auth::account,
        venues::create_venue,
        venues::venue,
        venues::heartbeat,
        venues::activity,
        sse::venue_events,
        realtime::realtime,
    ),
    components(schemas(
        schemas::UiCommandSchema,
        schemas::NewVenueSchema,
        schemas::ClientMessage,
        serialized::ErrorBody,
        serialized::Account,
        serialized::Track,
        serialized::PlayerSettings,
        serialized::Venue,
        serialized::ActivityEntry,
        serialized::CommandResponse,
        serialized::ServerEvent,
    )),
    modifiers(&Security),
    info(
        description = "jukebox-server exposes endpoints to control venues and follow their playback"
    )
)]
pub struct ApiDoc;

struct Security;

impl Modify for Security {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.borrow_mut() {
            let scheme = HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("Bearer <token>")
                .build();

            components.add_security_scheme("BearerAuth", SecurityScheme::Http(scheme))
        }
    }
}

pub async fn docs() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

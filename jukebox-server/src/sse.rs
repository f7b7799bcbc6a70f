use axum::{
    extract::Path,
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::get,
};
use futures_util::{Stream, StreamExt};
use jukebox_collab::rooms::ClientHandle;
use log::error;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    serialized::{ErrorBody, ServerEvent, ToSerialized},
    Router,
};

/// A read-only subscription to a single venue's room
pub struct VenueEventStream {
    handle: ClientHandle,
}

/// Turns an event into a server sent event named after its type
pub fn to_sse_event(event: &ServerEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.name()).data(data),
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            Event::default().comment("unserializable event")
        }
    }
}

impl Stream for VenueEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.handle
            .poll_next_unpin(cx)
            .map(|event| event.map(|e| Ok(to_sse_event(&e.to_serialized()))))
    }
}

#[utoipa::path(
    get,
    path = "/v1/venues/{id}/events",
    tag = "events",
    params(
        ("id" = i32, Path, description = "The venue id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (
            status = 200,
            content_type = "text/event-stream",
            description = "A snapshot of the venue, followed by its updates",
            body = ServerEvent
        ),
        (status = 404, body = ErrorBody)
    )
)]
async fn venue_events(
    session: Session,
    context: ServerContext,
    Path(venue_id): Path<i32>,
) -> ServerResult<Sse<VenueEventStream>> {
    let handle = context.collab.registry().connect(session.user.id);

    // Dropping the handle on failure also disconnects the client
    context.collab.venues.join(handle.id(), venue_id).await?;

    Ok(Sse::new(VenueEventStream { handle }).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router {
    Router::new().route("/:id/events", get(venue_events))
}

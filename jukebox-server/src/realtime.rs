use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures_util::StreamExt;
use jukebox_collab::{rooms::ClientHandle, UserData};
use log::{debug, error, info};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerError,
    schemas::ClientMessage,
    serialized::{ServerEvent, ToSerialized},
    Router,
};

#[utoipa::path(
    get,
    path = "/v1/realtime",
    tag = "events",
    params(
        ("token" = Option<String>, Query, description = "The credential, if not sent as a header")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (
            status = 101,
            description = "Upgrades to a websocket. Send joinVenue and leaveVenue messages, receive venue events",
            body = ServerEvent
        )
    )
)]
async fn realtime(session: Session, context: ServerContext, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(context, session.user, socket))
}

async fn handle_socket(context: ServerContext, user: UserData, mut socket: WebSocket) {
    let mut handle = context.collab.registry().connect(user.id);
    info!("User {} opened a realtime connection", user.id);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Realtime connection of user {} errored: {}", user.id, e);
                        break;
                    }
                    // Pings are answered by axum, binary frames are not part of the protocol
                    Some(Ok(_)) => continue,
                };

                if let Some(reply) = handle_message(&context, &handle, &text).await {
                    if send(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            event = handle.next() => {
                let Some(event) = event else {
                    break;
                };

                if send(&mut socket, &event.to_serialized()).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("User {} closed a realtime connection", user.id);
}

/// Handles a single client message, returning a reply to send back if any
async fn handle_message(
    context: &ServerContext,
    handle: &ClientHandle,
    text: &str,
) -> Option<ServerEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let error = ServerError::InvalidBody(e.to_string());

            return Some(ServerEvent::Error {
                error: error.kind().to_string(),
                message: error.to_string(),
            });
        }
    };

    let venues = &context.collab.venues;

    match message {
        // The snapshot arrives through the client's outbox
        ClientMessage::JoinVenue { venue_id } => match venues.join(handle.id(), venue_id).await {
            Ok(()) => None,
            Err(e) => {
                let error = ServerError::from(e);

                Some(ServerEvent::Error {
                    error: error.kind().to_string(),
                    message: error.to_string(),
                })
            }
        },
        ClientMessage::LeaveVenue { venue_id } => {
            venues.leave(handle.id(), venue_id);
            Some(ServerEvent::LeftVenue { venue_id })
        }
    }
}

async fn send(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            return Ok(());
        }
    };

    socket.send(Message::Text(text)).await
}

pub fn router() -> Router {
    Router::new().route("/realtime", get(realtime))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jukebox_collab::{Collab, Database, MemoryDatabase, NewUser, Role, StaticIdentityProvider};
    use jukebox_core::Config;

    use super::*;

    async fn context() -> (ServerContext, UserData) {
        let db = Arc::new(MemoryDatabase::new());

        let user = db
            .provision_user(NewUser {
                external_id: "owner".to_string(),
                email: "owner@example.com".to_string(),
                role: Role::User,
                venue_name: "Home".to_string(),
            })
            .await
            .unwrap();

        let collab = Collab::new(db, Arc::new(StaticIdentityProvider::new()), Config::default());
        (ServerContext::new(collab), user)
    }

    #[tokio::test]
    async fn test_join_and_leave_messages() {
        let (context, user) = context().await;
        let venue_id = user.venue_id.unwrap();
        let handle = context.collab.registry().connect(user.id);

        let join = format!(r#"{{ "type": "joinVenue", "venueId": {} }}"#, venue_id);
        assert!(handle_message(&context, &handle, &join).await.is_none());
        assert_eq!(context.collab.registry().rooms_of(handle.id()), vec![venue_id]);
        assert!(handle.try_next().is_some(), "snapshot is queued");

        let leave = format!(r#"{{ "type": "leaveVenue", "venueId": {} }}"#, venue_id);
        let reply = handle_message(&context, &handle, &leave).await;

        assert!(matches!(reply, Some(ServerEvent::LeftVenue { venue_id: id }) if id == venue_id));
        assert!(context.collab.registry().rooms_of(handle.id()).is_empty());
    }

    #[tokio::test]
    async fn test_bad_messages_get_error_replies() {
        let (context, user) = context().await;
        let handle = context.collab.registry().connect(user.id);

        let reply = handle_message(&context, &handle, "{ nope").await;
        assert!(matches!(reply, Some(ServerEvent::Error { error, .. }) if error == "InvalidPayload"));

        let missing = r#"{ "type": "joinVenue", "venueId": 9999 }"#;
        let reply = handle_message(&context, &handle, missing).await;
        assert!(matches!(reply, Some(ServerEvent::Error { error, .. }) if error == "NotFound"));
    }
}

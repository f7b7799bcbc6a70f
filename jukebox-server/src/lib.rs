mod auth;
mod commands;
mod context;
mod docs;
mod errors;
mod realtime;
mod schemas;
mod serialized;
mod sse;
mod venues;

use std::net::{Ipv6Addr, SocketAddr};

use axum::routing::get;
use log::info;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use context::ServerContext;
pub use errors::{ServerError, ServerResult};

/// The default port the server will listen on.
pub const DEFAULT_PORT: u16 = 9050;

pub type Router = axum::Router<ServerContext>;

/// Builds every route of the server
pub fn app(context: ServerContext) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let version_one_router = Router::new()
        .nest("/venues", venues::router().merge(sse::router()))
        .merge(auth::router())
        .merge(realtime::router());

    Router::new()
        .nest("/v1", version_one_router)
        .nest("/api", commands::router())
        .route("/api.json", get(docs::docs))
        .layer(cors)
        .with_state(context)
}

/// Starts the jukebox server
pub async fn run_server(context: ServerContext, port: u16) -> std::io::Result<()> {
    let addr: SocketAddr = (Ipv6Addr::UNSPECIFIED, port).into();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app(context).into_make_service()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use jukebox_collab::{
        Collab, Database, Identity, MemoryDatabase, Role, StaticIdentityProvider,
    };
    use jukebox_core::Config;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    struct Setup {
        db: Arc<MemoryDatabase>,
        context: ServerContext,
    }

    fn setup() -> Setup {
        let db = Arc::new(MemoryDatabase::new());

        let identity = |external_id: &str| Identity {
            external_id: external_id.to_string(),
            email: format!("{}@example.com", external_id),
            role: Role::User,
        };

        let provider = StaticIdentityProvider::new()
            .with("owner-token", identity("owner"))
            .with("guest-token", identity("guest"));

        let collab = Collab::new(db.clone(), Arc::new(provider), Config::default());

        Setup {
            db,
            context: ServerContext::new(collab),
        }
    }

    async fn request(
        context: &ServerContext,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app(context.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, value)
    }

    async fn account(context: &ServerContext, token: &str) -> Value {
        let (status, body) = request(context, "GET", "/v1/account", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    fn track(title: &str) -> Value {
        json!({
            "videoId": "dQw4w9WgXcQ",
            "title": title,
            "channelTitle": "Channel",
            "durationSeconds": 212.0,
            "thumbnailUrl": ""
        })
    }

    #[tokio::test]
    async fn test_account_requires_credentials() {
        let s = setup();

        let (status, body) = request(&s.context, "GET", "/v1/account", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], json!(false));

        let (status, _) = request(&s.context, "GET", "/v1/account", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            request(&s.context, "GET", "/v1/account?token=owner-token", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["externalId"], json!("owner"));
        assert!(body["venueId"].is_number(), "personal venue is provisioned");
    }

    #[tokio::test]
    async fn test_ui_command_play_track() {
        let s = setup();
        let owner = account(&s.context, "owner-token").await;
        let venue_id = owner["venueId"].clone();

        let (status, body) = request(
            &s.context,
            "POST",
            "/api/ui-command",
            Some("owner-token"),
            Some(json!({
                "command": "play_track",
                "venueId": venue_id,
                "userId": "owner",
                "data": { "track": track("Never Gonna Give You Up") }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["command"], json!("play_track"));
        assert_eq!(body["venueId"], venue_id);
        assert!(body["timestamp"].is_string());

        let uri = format!("/v1/venues/{}", venue_id);
        let (_, venue) = request(&s.context, "GET", &uri, Some("owner-token"), None).await;

        assert_eq!(venue["status"], json!("playing"));
        assert_eq!(venue["nowPlaying"]["title"], json!("Never Gonna Give You Up"));
        assert_eq!(venue["currentTimeSeconds"], json!(0.0));
        assert_eq!(s.db.all_activity().len(), 1);
    }

    #[tokio::test]
    async fn test_ui_command_errors() {
        let s = setup();
        let owner = account(&s.context, "owner-token").await;
        let venue_id = owner["venueId"].clone();

        let cases = [
            (
                json!({ "command": "dance", "venueId": venue_id, "data": {} }),
                "owner-token",
                StatusCode::BAD_REQUEST,
                "UnknownCommand",
            ),
            (
                json!({ "command": "play_track", "venueId": venue_id, "data": {} }),
                "owner-token",
                StatusCode::BAD_REQUEST,
                "InvalidPayload",
            ),
            (
                json!({ "command": "pause", "venueId": 9999 }),
                "owner-token",
                StatusCode::NOT_FOUND,
                "NotFound",
            ),
            (
                json!({ "command": "pause", "venueId": venue_id }),
                "owner-token",
                StatusCode::CONFLICT,
                "InvalidTransition",
            ),
            (
                json!({ "command": "pause", "venueId": venue_id }),
                "guest-token",
                StatusCode::FORBIDDEN,
                "Unauthorized",
            ),
            (
                json!({ "command": "pause", "venueId": venue_id, "userId": "someone-else" }),
                "owner-token",
                StatusCode::FORBIDDEN,
                "Unauthorized",
            ),
        ];

        for (payload, token, expected_status, expected_error) in cases {
            let (status, body) =
                request(&s.context, "POST", "/api/ui-command", Some(token), Some(payload)).await;

            assert_eq!(status, expected_status, "{}", body);
            assert_eq!(body["success"], json!(false));
            assert_eq!(body["error"], json!(expected_error));
            assert!(body["message"].is_string());
        }

        assert!(s.db.all_activity().is_empty(), "failed commands are not logged");
    }

    #[tokio::test]
    async fn test_venue_lifecycle() {
        let s = setup();

        let (status, venue) = request(
            &s.context,
            "POST",
            "/v1/venues",
            Some("owner-token"),
            Some(json!({ "name": "Rooftop" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(venue["status"], json!("idle"));

        let id = venue["id"].clone();

        let uri = format!("/v1/venues/{}/heartbeat", id);
        let (status, venue) = request(&s.context, "POST", &uri, Some("owner-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(venue["status"], json!("ready"));

        let (status, _) = request(&s.context, "POST", &uri, Some("guest-token"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let uri = format!("/v1/venues/{}/activity?limit=5", id);
        let (status, activity) = request(&s.context, "GET", &uri, Some("owner-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(activity[0]["eventType"], json!("create_venue"));

        let uri = format!("/v1/venues/{}/activity?limit=500", id);
        let (status, _) = request(&s.context, "GET", &uri, Some("owner-token"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = request(
            &s.context,
            "POST",
            "/v1/venues",
            Some("owner-token"),
            Some(json!({ "name": "" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("InvalidPayload"));
    }

    #[tokio::test]
    async fn test_store_outage_is_unavailable() {
        let s = setup();
        let owner = account(&s.context, "owner-token").await;

        s.db.fail_next_writes(10);

        let (status, body) = request(
            &s.context,
            "POST",
            "/api/ui-command",
            Some("owner-token"),
            Some(json!({
                "command": "update_volume",
                "venueId": owner["venueId"],
                "data": { "volume": 20 }
            })),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], json!("StoreUnavailable"));

        let venue_id = owner["venueId"].as_i64().unwrap() as i32;
        let venue = s.db.venue_by_id(venue_id).await.unwrap();
        assert_eq!(venue.playback.volume, 50);
    }

    #[tokio::test]
    async fn test_serves_api_document() {
        let s = setup();

        let (status, body) = request(&s.context, "GET", "/api.json", None, None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/ui-command"].is_object());
    }
}

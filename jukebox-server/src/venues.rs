use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Json,
};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{ActivityQuery, NewVenueSchema, ValidatedJson},
    serialized::{ActivityEntry, ErrorBody, ToSerialized, Venue},
    Router,
};

const DEFAULT_ACTIVITY_LIMIT: i64 = 50;

#[utoipa::path(
    post,
    path = "/v1/venues",
    tag = "venues",
    request_body = NewVenueSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Venue),
        (status = 400, body = ErrorBody)
    )
)]
async fn create_venue(
    session: Session,
    context: ServerContext,
    ValidatedJson(body): ValidatedJson<NewVenueSchema>,
) -> ServerResult<Json<Venue>> {
    let venue = context
        .collab
        .venues
        .create_venue(&session.user, &body.name)
        .await?;

    Ok(Json(venue.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/venues/{id}",
    tag = "venues",
    params(
        ("id" = i32, Path, description = "The venue id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Venue),
        (status = 404, body = ErrorBody)
    )
)]
async fn venue(
    _session: Session,
    context: ServerContext,
    Path(venue_id): Path<i32>,
) -> ServerResult<Json<Venue>> {
    let venue = context.collab.venues.venue(venue_id).await?;

    Ok(Json(venue.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/v1/venues/{id}/heartbeat",
    tag = "venues",
    params(
        ("id" = i32, Path, description = "The venue id")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "The host player is alive", body = Venue),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn heartbeat(
    session: Session,
    context: ServerContext,
    Path(venue_id): Path<i32>,
) -> ServerResult<Json<Venue>> {
    let venue = context
        .collab
        .venues
        .heartbeat(venue_id, &session.user)
        .await?;

    Ok(Json(venue.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/v1/venues/{id}/activity",
    tag = "venues",
    params(
        ("id" = i32, Path, description = "The venue id"),
        ActivityQuery
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, description = "Newest entries first", body = Vec<ActivityEntry>),
        (status = 400, body = ErrorBody),
        (status = 403, body = ErrorBody)
    )
)]
async fn activity(
    session: Session,
    context: ServerContext,
    Path(venue_id): Path<i32>,
    Query(query): Query<ActivityQuery>,
) -> ServerResult<Json<Vec<ActivityEntry>>> {
    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT);

    let entries = context
        .collab
        .venues
        .activity(venue_id, &session.user, limit)
        .await?;

    Ok(Json(entries.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_venue))
        .route("/:id", get(venue))
        .route("/:id/heartbeat", post(heartbeat))
        .route("/:id/activity", get(activity))
}

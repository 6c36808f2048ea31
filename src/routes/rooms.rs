use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use axum_valid::Valid;
use futures::Stream;
use tracing::info;

use crate::{
    dto::room::{
        CreateRoomRequest, JoinRoomRequest, PlayerRequest, RevealCompleteRequest,
        RoomJoinedResponse, RoomView, SessionQuery, SubmitChoiceRequest, SubmitChoiceResponse,
    },
    error::AppError,
    services::{room_service, session_service, sse_service},
    state::SharedState,
};

/// Room lifecycle, gameplay and per-player event stream routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{code}", get(get_room))
        .route("/rooms/{code}/join", post(join_room))
        .route("/rooms/{code}/choices", post(submit_choice))
        .route("/rooms/{code}/restart/request", post(request_restart))
        .route("/rooms/{code}/restart/accept", post(accept_restart))
        .route("/rooms/{code}/restart/reject", post(reject_restart))
        .route("/rooms/{code}/leave", post(leave_room))
        .route("/rooms/{code}/dismissal/complete", post(complete_dismissal))
        .route("/rooms/{code}/reveal/complete", post(complete_reveal))
        .route("/rooms/{code}/events", get(room_events))
}

/// Open a room with the caller in the first seat.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = RoomJoinedResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<RoomJoinedResponse>, AppError> {
    let response = room_service::create_room(&state, payload).await?;
    Ok(Json(response))
}

/// Read the public view of a room.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Current room", body = RoomView),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::get_room(&state, &code).await?;
    Ok(Json(room))
}

/// Take the second seat, or rejoin with a known player id.
#[utoipa::path(
    post,
    path = "/rooms/{code}/join",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined or rejoined", body = RoomJoinedResponse),
        (status = 404, description = "Room not found"),
        (status = 409, description = "Room is full")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<RoomJoinedResponse>, AppError> {
    let response = room_service::join_room(&state, &code, payload).await?;
    Ok(Json(response))
}

/// Submit a choice for the current round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/choices",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = SubmitChoiceRequest,
    responses(
        (status = 200, description = "Choice recorded or round resolved", body = SubmitChoiceResponse),
        (status = 409, description = "Duplicate submission, stale round or wrong phase")
    )
)]
pub async fn submit_choice(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<SubmitChoiceRequest>>,
) -> Result<Json<SubmitChoiceResponse>, AppError> {
    let response = room_service::submit_choice(&state, &code, payload).await?;
    Ok(Json(response))
}

/// Ask the opponent for a rematch.
#[utoipa::path(
    post,
    path = "/rooms/{code}/restart/request",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = PlayerRequest,
    responses((status = 200, description = "Request recorded", body = RoomView))
)]
pub async fn request_restart(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<PlayerRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::request_restart(&state, &code, payload.player_id).await?;
    Ok(Json(room))
}

/// Accept a pending rematch request.
#[utoipa::path(
    post,
    path = "/rooms/{code}/restart/accept",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = PlayerRequest,
    responses((status = 200, description = "Rematch started", body = RoomView))
)]
pub async fn accept_restart(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<PlayerRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::accept_restart(&state, &code, payload.player_id).await?;
    Ok(Json(room))
}

/// Decline a pending rematch request.
#[utoipa::path(
    post,
    path = "/rooms/{code}/restart/reject",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = PlayerRequest,
    responses((status = 200, description = "Rematch declined", body = RoomView))
)]
pub async fn reject_restart(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<PlayerRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::reject_restart(&state, &code, payload.player_id).await?;
    Ok(Json(room))
}

/// Leave the room.
#[utoipa::path(
    post,
    path = "/rooms/{code}/leave",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = PlayerRequest,
    responses((status = 200, description = "Departure recorded", body = RoomView))
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Json(payload)): Valid<Json<PlayerRequest>>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::leave_room(&state, &code, payload.player_id).await?;
    Ok(Json(room))
}

/// Start the second innings after the dismissal message.
#[utoipa::path(
    post,
    path = "/rooms/{code}/dismissal/complete",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    responses((status = 200, description = "Second innings running", body = RoomView))
)]
pub async fn complete_dismissal(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::complete_dismissal(&state, &code).await?;
    Ok(Json(room))
}

/// Hide the revealed choices of a round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/reveal/complete",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code")),
    request_body = RevealCompleteRequest,
    responses((status = 200, description = "Reveal cleared", body = RoomView))
)]
pub async fn complete_reveal(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Json(payload): Json<RevealCompleteRequest>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::complete_reveal(&state, &code, payload.round).await?;
    Ok(Json(room))
}

/// Stream the derived events of one player as server-sent events.
#[utoipa::path(
    get,
    path = "/rooms/{code}/events",
    tag = "rooms",
    params(("code" = String, Path, description = "Room code"), SessionQuery),
    responses(
        (status = 200, description = "Player event stream", content_type = "text/event-stream", body = String),
        (status = 401, description = "Player is not part of the room")
    )
)]
pub async fn room_events(
    State(state): State<SharedState>,
    Path(code): Path<String>,
    Valid(Query(query)): Valid<Query<SessionQuery>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let opened = session_service::open_session(&state, &code, query.player_id).await?;
    info!(room = %opened.session.room_code(), player = %opened.session.player_id(), "new player SSE connection");
    Ok(sse_service::to_sse_response(sse_service::session_stream(
        state, opened,
    )))
}

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        room_store::{RoundRequest, now_ms},
        storage::StorageError,
    },
    dto::{
        room::{
            CreateRoomRequest, JoinRoomRequest, RoomJoinedResponse, RoomView,
            SubmitChoiceRequest, SubmitChoiceResponse,
        },
        validation::validate_room_code,
    },
    error::ServiceError,
    services::room_actor::{self, RoomCommand, TransitionRequest},
    state::{
        SharedState,
        room::{Choice, PlayerId, Room},
    },
};

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 5;

/// Trim and upper-case a user supplied room code, rejecting malformed input.
pub fn normalize_room_code(raw: &str, min_len: usize) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() < min_len {
        return Err(ServiceError::InvalidInput(format!(
            "room code must have at least {min_len} characters"
        )));
    }
    validate_room_code(&code).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|m| m.to_string())
                .unwrap_or_else(|| "invalid room code".into()),
        )
    })?;
    Ok(code)
}

/// Random room code of `len` characters drawn from `A-Z0-9`.
pub fn generate_room_code<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| ROOM_CODE_CHARSET[rng.random_range(0..ROOM_CODE_CHARSET.len())] as char)
        .collect()
}

fn session_id(requested: Option<PlayerId>) -> PlayerId {
    requested.unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Open a room with the caller in the first seat.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<RoomJoinedResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let player_id = session_id(request.player_id);
    let name = request.player_name.trim().to_string();

    for attempt in 0..MAX_CODE_ATTEMPTS {
        let code = generate_room_code(state.config().room_code_length, &mut rand::rng());
        let room = Room::new(code.clone(), player_id.clone(), name.clone(), now_ms());
        match store.create_room(room).await {
            Ok(room) => {
                info!(room = %code, player = %player_id, "room created");
                return Ok(RoomJoinedResponse {
                    room_code: code,
                    player_id,
                    rejoined: false,
                    room: room.into(),
                });
            }
            Err(StorageError::DuplicateRoom { .. }) => {
                warn!(room = %code, attempt, "generated room code already taken");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(
        "could not allocate a free room code".into(),
    ))
}

/// Take the second seat of `raw_code`, or rejoin when the caller already sits there.
pub async fn join_room(
    state: &SharedState,
    raw_code: &str,
    request: JoinRoomRequest,
) -> Result<RoomJoinedResponse, ServiceError> {
    let code = normalize_room_code(raw_code, state.config().room_code_length)?;
    let player_id = session_id(request.player_id);
    let name = request.player_name.trim().to_string();

    let outcome = room_actor::dispatch(state, &code, |respond| RoomCommand::Join {
        player_id: player_id.clone(),
        name: name.clone(),
        respond,
    })
    .await?;

    Ok(RoomJoinedResponse {
        room_code: code,
        player_id,
        rejoined: outcome.rejoined,
        room: outcome.room.into(),
    })
}

/// Load the raw room record.
pub async fn load_room(state: &SharedState, code: &str) -> Result<Room, ServiceError> {
    let store = state.require_room_store().await?;
    store
        .get_room(code)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Room not found".into()))
}

/// Read the public view of a room.
pub async fn get_room(state: &SharedState, raw_code: &str) -> Result<RoomView, ServiceError> {
    let code = normalize_room_code(raw_code, 1)?;
    load_room(state, &code).await.map(RoomView::from)
}

/// Submit a choice for the current round.
pub async fn submit_choice(
    state: &SharedState,
    raw_code: &str,
    request: SubmitChoiceRequest,
) -> Result<SubmitChoiceResponse, ServiceError> {
    let code = normalize_room_code(raw_code, 1)?;
    let choice =
        Choice::try_from(request.choice).map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let round_request = RoundRequest {
        player_id: request.player_id,
        choice,
        round: request.round,
    };

    let outcome = room_actor::dispatch(state, &code, |respond| RoomCommand::Submit {
        request: round_request.clone(),
        respond,
    })
    .await?;

    Ok(SubmitChoiceResponse {
        status: outcome.status,
        path: outcome.path,
        room: outcome.room.into(),
    })
}

async fn transition(
    state: &SharedState,
    raw_code: &str,
    request: TransitionRequest,
) -> Result<RoomView, ServiceError> {
    let code = normalize_room_code(raw_code, 1)?;
    let room = room_actor::dispatch(state, &code, |respond| RoomCommand::Transition {
        request: request.clone(),
        respond,
    })
    .await?;
    Ok(room.into())
}

/// Ask the opponent for a rematch.
pub async fn request_restart(
    state: &SharedState,
    raw_code: &str,
    player_id: PlayerId,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::RequestRestart { by: player_id }).await
}

/// Accept the opponent's rematch request and start a fresh match.
pub async fn accept_restart(
    state: &SharedState,
    raw_code: &str,
    player_id: PlayerId,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::AcceptRestart { by: player_id }).await
}

/// Decline a rematch; the decliner is recorded as having left.
pub async fn reject_restart(
    state: &SharedState,
    raw_code: &str,
    player_id: PlayerId,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::RejectRestart { by: player_id }).await
}

/// Mark the caller as departed.
pub async fn leave_room(
    state: &SharedState,
    raw_code: &str,
    player_id: PlayerId,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::Leave { player_id }).await
}

/// Start the second innings once the dismissal message was shown. Idempotent.
pub async fn complete_dismissal(
    state: &SharedState,
    raw_code: &str,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::DismissalShown).await
}

/// Clear the revealed choices of `round`. Idempotent.
pub async fn complete_reveal(
    state: &SharedState,
    raw_code: &str,
    round: u32,
) -> Result<RoomView, ServiceError> {
    transition(state, raw_code, TransitionRequest::RevealShown { round }).await
}

//! Submission coordinator: records a player's choice and resolves the round
//! once both players have moved.
//!
//! The atomic path asks the store to re-read, plan and write in one serialized
//! operation. Stores without that capability (or failing transiently) go
//! through [`submit_fallback`], which reads the room, writes the caller's
//! choice and, if the peer's choice was already present in that read, writes
//! the resolution as a second update.
//!
//! The fallback has a known race. When both players run it at the same time,
//! both reads can see the peer's choice as absent; both then only record their
//! own choice and nobody resolves. The room is left with two pending choices
//! until something writes it again. Inside one process the room actor
//! serializes submissions so this cannot happen; it remains possible when
//! several processes share a store without atomic capability.

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::{
    dao::{
        room_store::{RoomStore, RoundRequest, RoundStatus},
        storage::{StorageError, StorageResult},
    },
    state::{
        resolver::{SubmissionPlan, plan_submission},
        room::{Room, RoomPatch},
    },
};

/// Which path carried a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPath {
    /// The store resolved the round in one serialized operation.
    Atomic,
    /// Client-side read then write.
    Fallback,
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Whether the round resolved.
    pub status: RoundStatus,
    /// Room after the last write.
    pub room: Room,
    /// Path the submission took.
    pub path: SubmitPath,
}

/// Submit a choice, preferring the store's atomic round resolution.
pub async fn submit(
    store: &dyn RoomStore,
    room_code: &str,
    request: RoundRequest,
) -> StorageResult<SubmitOutcome> {
    match store.atomic_resolve_round(room_code, request.clone()).await {
        Ok(outcome) => Ok(SubmitOutcome {
            status: outcome.status,
            room: outcome.room,
            path: SubmitPath::Atomic,
        }),
        Err(err) if err.allows_fallback() => {
            if matches!(err, StorageError::Unsupported { .. }) {
                debug!(room = room_code, "atomic rounds unsupported; using fallback path");
            } else {
                warn!(room = room_code, error = %err, "atomic round failed; using fallback path");
            }
            submit_fallback(store, room_code, request).await
        }
        Err(err) => Err(err),
    }
}

/// Read-then-write submission used when the store cannot resolve rounds atomically.
pub async fn submit_fallback(
    store: &dyn RoomStore,
    room_code: &str,
    request: RoundRequest,
) -> StorageResult<SubmitOutcome> {
    let room = store
        .get_room(room_code)
        .await?
        .ok_or_else(|| StorageError::RoomNotFound {
            code: room_code.to_string(),
        })?;

    let plan = plan_submission(&room, &request.player_id, request.choice, request.round)?;
    let slot = room
        .slot_of(&request.player_id)
        .ok_or_else(|| StorageError::RoomNotFound {
            code: room_code.to_string(),
        })?;

    let recorded = store
        .update_room(room_code, RoomPatch::choice(slot, Some(request.choice)))
        .await?;

    match plan {
        SubmissionPlan::Record { .. } => Ok(SubmitOutcome {
            status: RoundStatus::Waiting,
            room: recorded,
            path: SubmitPath::Fallback,
        }),
        SubmissionPlan::Resolve { patch, .. } => {
            let room = store.update_room(room_code, patch).await?;
            Ok(SubmitOutcome {
                status: RoundStatus::Resolved,
                room,
                path: SubmitPath::Fallback,
            })
        }
    }
}

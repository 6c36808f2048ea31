#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    dao::storage::{StorageError, StorageResult},
    state::{
        resolver::{SubmissionPlan, plan_submission},
        room::{Choice, PlayerId, Room, RoomPatch},
    },
};

/// A player's submission for the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundRequest {
    /// Submitting player.
    pub player_id: PlayerId,
    /// Fingers shown this round.
    pub choice: Choice,
    /// Idempotency key: the round the client believes it is playing.
    pub round: Option<u32>,
}

/// Whether a submission completed the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Both choices were in; the round was resolved.
    Resolved,
    /// The choice was recorded; the opponent has not moved yet.
    Waiting,
}

/// Result of a round submission together with the written record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundOutcome {
    /// Whether the round resolved.
    pub status: RoundStatus,
    /// Room after the write.
    pub room: Room,
}

/// Abstraction over the persistence layer for rooms.
pub trait RoomStore: Send + Sync {
    /// Insert a new room; fails with [`StorageError::DuplicateRoom`] when the code is taken.
    fn create_room(&self, room: Room) -> BoxFuture<'static, StorageResult<Room>>;
    /// Fetch a room, `None` when the code is unknown.
    fn get_room(&self, room_code: &str) -> BoxFuture<'static, StorageResult<Option<Room>>>;
    /// Apply a partial update, honouring the patch's version precondition.
    fn update_room(&self, room_code: &str, patch: RoomPatch)
    -> BoxFuture<'static, StorageResult<Room>>;
    /// Re-read, plan and write a submission as one serialized operation.
    fn atomic_resolve_round(
        &self,
        room_code: &str,
        request: RoundRequest,
    ) -> BoxFuture<'static, StorageResult<RoundOutcome>>;
    fn supports_atomic_rounds(&self) -> bool;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Apply `patch` to a stored record the way every backend must: check the
/// version precondition, then bump the version and the update timestamp.
pub(crate) fn commit_patch(room: &mut Room, patch: &RoomPatch) -> StorageResult<()> {
    if let Some(expected) = patch.expected_version.filter(|v| *v != room.version) {
        return Err(StorageError::VersionConflict {
            code: room.room_code.clone(),
            expected,
            actual: room.version,
        });
    }
    room.apply(patch);
    room.version += 1;
    room.updated_at_ms = now_ms().max(room.updated_at_ms);
    Ok(())
}

/// Plan a submission against the freshly read record.
pub(crate) fn plan_round(room: &Room, request: &RoundRequest) -> StorageResult<(RoomPatch, RoundStatus)> {
    let plan = plan_submission(room, &request.player_id, request.choice, request.round)?;
    let status = match plan {
        SubmissionPlan::Record { .. } => RoundStatus::Waiting,
        SubmissionPlan::Resolve { .. } => RoundStatus::Resolved,
    };
    let patch = match plan {
        SubmissionPlan::Record { patch } | SubmissionPlan::Resolve { patch, .. } => patch,
    };
    Ok((patch, status))
}

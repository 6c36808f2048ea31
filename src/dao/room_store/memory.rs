use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;

use super::{RoomStore, RoundOutcome, RoundRequest, commit_patch, plan_round};
use crate::{
    dao::storage::{StorageError, StorageResult},
    state::room::{Room, RoomPatch},
};

/// Process-local [`RoomStore`] backed by a concurrent map.
///
/// Round resolution holds the map entry lock while planning and writing, which
/// makes it race-free. Turning `atomic_rounds` off makes the store behave like
/// a backend without that capability so the fallback path gets exercised.
#[derive(Clone)]
pub struct MemoryRoomStore {
    rooms: Arc<DashMap<String, Room>>,
    atomic_rounds: bool,
}

impl MemoryRoomStore {
    pub fn new(atomic_rounds: bool) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            atomic_rounds,
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoomStore for MemoryRoomStore {
    fn create_room(&self, room: Room) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        Box::pin(async move {
            match store.rooms.entry(room.room_code.clone()) {
                Entry::Occupied(_) => Err(StorageError::DuplicateRoom {
                    code: room.room_code,
                }),
                Entry::Vacant(slot) => {
                    let mut room = room;
                    room.version = 1;
                    Ok(slot.insert(room).clone())
                }
            }
        })
    }

    fn get_room(&self, room_code: &str) -> BoxFuture<'static, StorageResult<Option<Room>>> {
        let store = self.clone();
        let room_code = room_code.to_string();
        Box::pin(async move { Ok(store.rooms.get(&room_code).map(|room| room.clone())) })
    }

    fn update_room(
        &self,
        room_code: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        let room_code = room_code.to_string();
        Box::pin(async move {
            let mut room = store
                .rooms
                .get_mut(&room_code)
                .ok_or(StorageError::RoomNotFound { code: room_code })?;
            commit_patch(&mut room, &patch)?;
            Ok(room.clone())
        })
    }

    fn atomic_resolve_round(
        &self,
        room_code: &str,
        request: RoundRequest,
    ) -> BoxFuture<'static, StorageResult<RoundOutcome>> {
        let store = self.clone();
        let room_code = room_code.to_string();
        Box::pin(async move {
            if !store.atomic_rounds {
                return Err(StorageError::Unsupported {
                    operation: "atomic_resolve_round",
                });
            }

            let mut room = store
                .rooms
                .get_mut(&room_code)
                .ok_or(StorageError::RoomNotFound { code: room_code })?;
            let (patch, status) = plan_round(&room, &request)?;
            commit_patch(&mut room, &patch)?;
            Ok(RoundOutcome {
                status,
                room: room.clone(),
            })
        })
    }

    fn supports_atomic_rounds(&self) -> bool {
        self.atomic_rounds
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::room_store::RoundStatus,
        state::{
            resolver::SubmitRejection,
            room::{Choice, GamePhase},
        },
    };

    fn request(player_id: &str, value: u8) -> RoundRequest {
        RoundRequest {
            player_id: player_id.into(),
            choice: Choice::try_from(value).unwrap(),
            round: None,
        }
    }

    async fn seeded(atomic: bool) -> MemoryRoomStore {
        let store = MemoryRoomStore::new(atomic);
        let mut room = Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0);
        room.player2_id = Some("p2".into());
        room.player2_name = Some("Ravi".into());
        store.create_room(room).await.unwrap();
        store
    }

    #[tokio::test]
    async fn duplicate_codes_are_rejected() {
        let store = seeded(true).await;
        let err = store
            .create_room(Room::new("ROOM42".into(), "x".into(), "X".into(), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DuplicateRoom { .. }));
    }

    #[tokio::test]
    async fn updates_bump_version_and_honour_preconditions() {
        let store = seeded(true).await;
        let room = store.get_room("ROOM42").await.unwrap().unwrap();
        assert_eq!(room.version, 1);

        let patch = RoomPatch {
            out_message: Some(Some("hello".into())),
            ..RoomPatch::default()
        };
        let updated = store
            .update_room("ROOM42", patch.clone().expecting(1))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = store
            .update_room("ROOM42", patch.expecting(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn atomic_round_records_then_resolves() {
        let store = seeded(true).await;

        let first = store
            .atomic_resolve_round("ROOM42", request("p2", 2))
            .await
            .unwrap();
        assert_eq!(first.status, RoundStatus::Waiting);

        let second = store
            .atomic_resolve_round("ROOM42", request("p1", 4))
            .await
            .unwrap();
        assert_eq!(second.status, RoundStatus::Resolved);
        assert_eq!(second.room.player1_runs, 4);
        assert!(second.room.choices_cleared());
        assert_eq!(second.room.game_phase, GamePhase::Playing);
    }

    #[tokio::test]
    async fn concurrent_atomic_submissions_always_resolve() {
        let store = seeded(true).await;
        let a = tokio::spawn({
            let store = store.clone();
            async move { store.atomic_resolve_round("ROOM42", request("p1", 5)).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.atomic_resolve_round("ROOM42", request("p2", 3)).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let room = store.get_room("ROOM42").await.unwrap().unwrap();
        assert_eq!(room.round, 1);
        assert!(room.choices_cleared());
        assert_eq!(room.player1_runs, 5);
    }

    #[tokio::test]
    async fn rejected_submissions_leave_room_untouched() {
        let store = seeded(true).await;
        let err = store
            .atomic_resolve_round("ROOM42", request("ghost", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Rejected(SubmitRejection::NotAMember(_))
        ));
        assert_eq!(store.get_room("ROOM42").await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn atomic_path_can_be_switched_off() {
        let store = seeded(false).await;
        let err = store
            .atomic_resolve_round("ROOM42", request("p1", 1))
            .await
            .unwrap_err();
        assert!(err.allows_fallback());
        assert!(!store.supports_atomic_rounds());
    }
}

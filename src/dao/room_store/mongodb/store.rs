use std::sync::Arc;

use futures::future::BoxFuture;
use mongodb::{Client, Collection, Database, bson::doc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{MongoRoomDocument, ROOM_COLLECTION_NAME},
};
use crate::{
    dao::{
        room_store::{RoomStore, RoundOutcome, RoundRequest, commit_patch, plan_round},
        storage::{StorageError, StorageResult},
    },
    state::room::{Room, RoomPatch},
};

/// Compare-and-swap attempts before a write gives up on a busy room.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// MongoDB-backed [`RoomStore`].
///
/// Writes are read-modify-write cycles guarded by the room version: the
/// replacement only matches the document it was computed from, so
/// `atomic_resolve_round` is serialized per room across processes.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        Ok(Self { inner })
    }

    async fn collection(&self) -> Collection<MongoRoomDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoRoomDocument>(ROOM_COLLECTION_NAME)
    }

    async fn insert(&self, mut room: Room) -> StorageResult<Room> {
        room.version = 1;
        let code = room.room_code.clone();
        let document = MongoRoomDocument::from(room);

        match self.collection().await.insert_one(&document).await {
            Ok(_) => Ok(document.room),
            Err(source) if is_duplicate_key(&source) => Err(StorageError::DuplicateRoom { code }),
            Err(source) => Err(MongoDaoError::InsertRoom { code, source }.into()),
        }
    }

    async fn find(&self, code: &str) -> MongoResult<Option<Room>> {
        let document = self
            .collection()
            .await
            .find_one(doc! { "_id": code })
            .await
            .map_err(|source| MongoDaoError::LoadRoom {
                code: code.to_owned(),
                source,
            })?;
        Ok(document.map(|document| document.room))
    }

    /// Read the room, let `change` mutate it and swap it in if nobody wrote meanwhile.
    async fn modify<T, F>(&self, code: &str, mut change: F) -> StorageResult<(Room, T)>
    where
        F: FnMut(&mut Room) -> StorageResult<T>,
    {
        let mut last_seen = 0;
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some(mut room) = self.find(code).await? else {
                return Err(StorageError::RoomNotFound {
                    code: code.to_owned(),
                });
            };
            let seen = room.version;
            last_seen = seen;
            let value = change(&mut room)?;

            let document = MongoRoomDocument::from(room);
            let result = self
                .collection()
                .await
                .replace_one(doc! { "_id": code, "room.version": seen as i64 }, &document)
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    code: code.to_owned(),
                    source,
                })?;

            if result.matched_count == 1 {
                return Ok((document.room, value));
            }
            debug!(room = code, attempt, "room changed during write; retrying");
        }

        Err(StorageError::VersionConflict {
            code: code.to_owned(),
            expected: last_seen,
            actual: last_seen + 1,
        })
    }
}

impl RoomStore for MongoRoomStore {
    fn create_room(&self, room: Room) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        Box::pin(async move { store.insert(room).await })
    }

    fn get_room(&self, room_code: &str) -> BoxFuture<'static, StorageResult<Option<Room>>> {
        let store = self.clone();
        let room_code = room_code.to_owned();
        Box::pin(async move { store.find(&room_code).await.map_err(Into::into) })
    }

    fn update_room(
        &self,
        room_code: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        let room_code = room_code.to_owned();
        Box::pin(async move {
            let (room, ()) = store
                .modify(&room_code, |room| commit_patch(room, &patch))
                .await?;
            Ok(room)
        })
    }

    fn atomic_resolve_round(
        &self,
        room_code: &str,
        request: RoundRequest,
    ) -> BoxFuture<'static, StorageResult<RoundOutcome>> {
        let store = self.clone();
        let room_code = room_code.to_owned();
        Box::pin(async move {
            let (room, status) = store
                .modify(&room_code, |room| {
                    let (patch, status) = plan_round(room, &request)?;
                    commit_patch(room, &patch)?;
                    Ok(status)
                })
                .await?;
            Ok(RoundOutcome { status, room })
        })
    }

    fn supports_atomic_rounds(&self) -> bool {
        true
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

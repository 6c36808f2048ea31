use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchRoomDocument, room_doc_id},
};
use crate::{
    dao::{
        room_store::{RoomStore, RoundOutcome, RoundRequest, commit_patch},
        storage::{StorageError, StorageResult},
    },
    state::room::{Room, RoomPatch},
};

/// Revision conflicts tolerated before an update gives up.
const MAX_REV_ATTEMPTS: u32 = 8;

/// CouchDB-backed [`RoomStore`].
///
/// The atomic round capability is left off on purpose: rooms on CouchDB are
/// the deployment that exercises the fallback submission path, with its
/// known race. Plain updates still retry on `_rev` conflicts.
#[derive(Clone)]
pub struct CouchRoomStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

/// Outcome of a conditional PUT.
enum PutResult {
    Written,
    Conflict,
}

impl CouchRoomStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}/{}", self.base_url, self.database, path);
        self.with_auth(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = format!("{}/{}", self.base_url, self.database);

        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .with_auth(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchRoomDocument>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchRoomDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, document: &CouchRoomDocument) -> CouchResult<PutResult> {
        let response = self
            .request(Method::PUT, &document.id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: document.id.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutResult::Conflict),
            status if status.is_success() => Ok(PutResult::Written),
            status => Err(CouchDaoError::RequestStatus {
                path: document.id.clone(),
                status,
            }),
        }
    }

    async fn insert(&self, mut room: Room) -> StorageResult<Room> {
        room.version = 1;
        let document = CouchRoomDocument::new(room, None);
        match self.put_document(&document).await? {
            PutResult::Written => Ok(document.room),
            PutResult::Conflict => Err(StorageError::DuplicateRoom {
                code: document.room.room_code,
            }),
        }
    }

    async fn update(&self, code: &str, patch: &RoomPatch) -> StorageResult<Room> {
        let doc_id = room_doc_id(code);
        let mut last_seen = 0;

        for attempt in 1..=MAX_REV_ATTEMPTS {
            let Some(mut document) = self.get_document(&doc_id).await? else {
                return Err(StorageError::RoomNotFound {
                    code: code.to_owned(),
                });
            };
            last_seen = document.room.version;
            commit_patch(&mut document.room, patch)?;

            match self.put_document(&document).await? {
                PutResult::Written => return Ok(document.room),
                PutResult::Conflict => {
                    debug!(room = code, attempt, "CouchDB revision conflict; retrying");
                }
            }
        }

        Err(StorageError::VersionConflict {
            code: code.to_owned(),
            expected: last_seen,
            actual: last_seen + 1,
        })
    }
}

impl RoomStore for CouchRoomStore {
    fn create_room(&self, room: Room) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        Box::pin(async move { store.insert(room).await })
    }

    fn get_room(&self, room_code: &str) -> BoxFuture<'static, StorageResult<Option<Room>>> {
        let store = self.clone();
        let doc_id = room_doc_id(room_code);
        Box::pin(async move {
            let document = store.get_document(&doc_id).await?;
            Ok(document.map(|document| document.room))
        })
    }

    fn update_room(
        &self,
        room_code: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        let room_code = room_code.to_owned();
        Box::pin(async move { store.update(&room_code, &patch).await })
    }

    fn atomic_resolve_round(
        &self,
        _room_code: &str,
        _request: RoundRequest,
    ) -> BoxFuture<'static, StorageResult<RoundOutcome>> {
        Box::pin(async {
            Err(StorageError::Unsupported {
                operation: "atomic_resolve_round",
            })
        })
    }

    fn supports_atomic_rounds(&self) -> bool {
        false
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = format!("{}/{}", store.base_url, store.database);
            let response = store
                .with_auth(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::Choice;

    fn offline_store() -> CouchRoomStore {
        CouchRoomStore {
            client: Client::new(),
            base_url: Arc::from("http://127.0.0.1:1"),
            database: Arc::from("rooms"),
            auth: None,
        }
    }

    #[tokio::test]
    async fn rounds_always_take_the_fallback_path() {
        let store = offline_store();
        assert!(!store.supports_atomic_rounds());

        let request = RoundRequest {
            player_id: "p1".into(),
            choice: Choice::try_from(3).unwrap(),
            round: None,
        };
        let err = store
            .atomic_resolve_round("ROOM42", request)
            .await
            .unwrap_err();
        assert!(err.allows_fallback());
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }
}

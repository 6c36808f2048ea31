use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    dao::{
        room_store::{RoundOutcome, RoundRequest, RoomStore},
        storage::StorageResult,
    },
    state::room::{Room, RoomPatch},
};

/// Per-room broadcast of full room records after every successful write.
pub struct ChangeFeed {
    capacity: usize,
    channels: DashMap<String, broadcast::Sender<Room>>,
}

impl ChangeFeed {
    /// Create a feed whose per-room channels buffer `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
        }
    }

    /// Register a subscriber for `room_code`. Dropping the receiver unsubscribes.
    pub fn subscribe(&self, room_code: &str) -> broadcast::Receiver<Room> {
        self.channels
            .entry(room_code.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Push `room` to every subscriber of its code.
    pub fn publish(&self, room: &Room) {
        let Some(sender) = self.channels.get(&room.room_code).map(|entry| entry.clone()) else {
            return;
        };

        if sender.send(room.clone()).is_err() {
            // Nobody listens anymore; drop the channel unless someone subscribed meanwhile.
            self.channels
                .remove_if(&room.room_code, |_, sender| sender.receiver_count() == 0);
            debug!(room = %room.room_code, "dropped change feed without subscribers");
        }
    }

    /// Number of rooms with a live channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Store decorator publishing every record a write returns.
#[derive(Clone)]
pub struct PublishingRoomStore {
    inner: Arc<dyn RoomStore>,
    feed: Arc<ChangeFeed>,
}

impl PublishingRoomStore {
    /// Wrap `inner` so its writes reach `feed`.
    pub fn new(inner: Arc<dyn RoomStore>, feed: Arc<ChangeFeed>) -> Self {
        Self { inner, feed }
    }
}

impl RoomStore for PublishingRoomStore {
    fn create_room(&self, room: Room) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        Box::pin(async move {
            let room = store.inner.create_room(room).await?;
            store.feed.publish(&room);
            Ok(room)
        })
    }

    fn get_room(&self, room_code: &str) -> BoxFuture<'static, StorageResult<Option<Room>>> {
        self.inner.get_room(room_code)
    }

    fn update_room(
        &self,
        room_code: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<Room>> {
        let store = self.clone();
        let room_code = room_code.to_string();
        Box::pin(async move {
            let room = store.inner.update_room(&room_code, patch).await?;
            store.feed.publish(&room);
            Ok(room)
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
            let outcome = store.inner.atomic_resolve_round(&room_code, request).await?;
            store.feed.publish(&outcome.room);
            Ok(outcome)
        })
    }

    fn supports_atomic_rounds(&self) -> bool {
        self.inner.supports_atomic_rounds()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

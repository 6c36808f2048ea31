pub mod feed;
pub mod reconciler;
pub mod resolver;
pub mod room;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::room_store::RoomStore,
    error::ServiceError,
    services::room_actor::RoomHandle,
};

pub use self::feed::{ChangeFeed, PublishingRoomStore};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the installed store, the change
/// feed and the registry of running room actors.
pub struct AppState {
    config: AppConfig,
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    feed: Arc<ChangeFeed>,
    rooms: DashMap<String, RoomHandle>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            feed: Arc::new(ChangeFeed::new(config.feed_capacity)),
            config,
            room_store: RwLock::new(None),
            rooms: DashMap::new(),
            degraded: degraded_tx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Change feed fed by every store write.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current room store, or [`ServiceError::Degraded`] while storage is unavailable.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store behind the publishing decorator and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        let store: Arc<dyn RoomStore> = Arc::new(PublishingRoomStore::new(store, self.feed.clone()));
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Registry of running room actors keyed by room code.
    pub fn rooms(&self) -> &DashMap<String, RoomHandle> {
        &self.rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::room_store::memory::MemoryRoomStore;

    #[tokio::test]
    async fn installing_a_store_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_room_store().await,
            Err(ServiceError::Degraded)
        ));

        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;
        assert!(!state.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(state.require_room_store().await.is_ok());

        state.clear_room_store().await;
        assert!(state.is_degraded());
    }
}

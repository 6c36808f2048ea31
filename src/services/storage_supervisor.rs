use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to an external room store and keep the shared state in degraded
/// mode whenever it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_room_store(store.clone()).await;
                info!(
                    atomic_rounds = store.supports_atomic_rounds(),
                    "storage connection established; leaving degraded mode"
                );
                delay = INITIAL_DELAY;

                while supervise(&state, store.as_ref()).await {
                    sleep(HEALTH_POLL_INTERVAL).await;
                }

                warn!("exhausted storage reconnect attempts; dropping store");
                state.clear_room_store().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// One health round. Returns `false` once the store should be given up.
async fn supervise(state: &SharedState, store: &dyn RoomStore) -> bool {
    if store.health_check().await.is_ok() {
        if state.is_degraded() {
            info!("storage healthy again; leaving degraded mode");
            state.update_degraded(false);
        }
        return true;
    }

    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                state.update_degraded(false);
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "storage reconnect first attempt failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "storage reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report degraded mode, running room actors and watched rooms, logging storage issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_room_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "storage health check failed");
            }
        }
        Err(_) => warn!("storage unavailable (degraded mode)"),
    }

    let active_rooms = state.rooms().len();
    let watched_rooms = state.feed().channel_count();
    if state.is_degraded() {
        HealthResponse::degraded(active_rooms, watched_rooms)
    } else {
        HealthResponse::ok(active_rooms, watched_rooms)
    }
}

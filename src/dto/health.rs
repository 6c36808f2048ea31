use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Room actors currently running.
    pub active_rooms: usize,
    /// Rooms with at least one live change-feed channel.
    pub watched_rooms: usize,
}

impl HealthResponse {
    pub fn ok(active_rooms: usize, watched_rooms: usize) -> Self {
        Self {
            status: "ok".to_string(),
            active_rooms,
            watched_rooms,
        }
    }

    pub fn degraded(active_rooms: usize, watched_rooms: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            active_rooms,
            watched_rooms,
        }
    }
}

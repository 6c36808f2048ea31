use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Named payload ready to be written to an SSE stream.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of a player's stream.
pub struct Handshake {
    pub room_code: String,
    pub player_id: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    pub degraded: bool,
}

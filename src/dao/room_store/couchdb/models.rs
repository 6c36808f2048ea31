use serde::{Deserialize, Serialize};

use crate::state::room::Room;

pub const ROOM_PREFIX: &str = "room::";

/// Document id of a room.
pub fn room_doc_id(code: &str) -> String {
    format!("{ROOM_PREFIX}{code}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub room: Room,
}

impl CouchRoomDocument {
    pub fn new(room: Room, rev: Option<String>) -> Self {
        Self {
            id: room_doc_id(&room.room_code),
            rev,
            room,
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::state::room::Room;

pub const ROOM_COLLECTION_NAME: &str = "rooms";

/// Stored shape of a room: the code doubles as the document key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoomDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub room: Room,
}

impl From<Room> for MongoRoomDocument {
    fn from(room: Room) -> Self {
        Self {
            id: room.room_code.clone(),
            room,
        }
    }
}

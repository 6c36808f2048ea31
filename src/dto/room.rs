use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    dao::room_store::RoundStatus,
    dto::{
        format_timestamp_ms,
        validation::validate_player_name,
    },
    services::submission::SubmitPath,
    state::room::{Choice, GamePhase, Negotiation, PlayerId, Room, Scoreboard},
};

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    /// Display name of the creator.
    #[validate(length(min = 1, max = 32), custom(function = "validate_player_name"))]
    pub player_name: String,
    /// Session identifier to reuse; generated when omitted.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub player_id: Option<PlayerId>,
}

/// Payload used to take the second seat of a room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRoomRequest {
    #[validate(length(min = 1, max = 32), custom(function = "validate_player_name"))]
    pub player_name: String,
    /// Session identifier to reuse; a known identifier rejoins without changes.
    #[serde(default)]
    #[validate(length(min = 1, max = 64))]
    pub player_id: Option<PlayerId>,
}

/// Identifies the acting player for restart, leave and similar commands.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PlayerRequest {
    #[validate(length(min = 1, max = 64))]
    pub player_id: PlayerId,
}

/// A choice for the current round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitChoiceRequest {
    #[validate(length(min = 1, max = 64))]
    pub player_id: PlayerId,
    /// Value between 1 and 6.
    #[validate(range(min = 1, max = 6))]
    pub choice: u8,
    /// Round the client believes it is playing; stale values are rejected.
    #[serde(default)]
    pub round: Option<u32>,
}

/// Acknowledges that the reveal of `round` has been displayed.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RevealCompleteRequest {
    pub round: u32,
}

/// Query string of the per-player event stream.
#[derive(Debug, Deserialize, IntoParams, Validate)]
pub struct SessionQuery {
    #[validate(length(min = 1, max = 64))]
    pub player_id: PlayerId,
}

/// Public view of a room. Pending choices are masked until the round resolves.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomView {
    pub room_code: String,
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    pub player1_id: PlayerId,
    pub player1_name: String,
    pub player2_id: Option<PlayerId>,
    pub player2_name: Option<String>,
    pub batting_player_id: PlayerId,
    pub game_phase: GamePhase,
    pub scoreboard: Scoreboard,
    pub player1_has_chosen: bool,
    pub player2_has_chosen: bool,
    pub last_batting_choice: Option<Choice>,
    pub last_bowling_choice: Option<Choice>,
    pub out_message: Option<String>,
    pub negotiation: Negotiation,
    pub player_left: Option<PlayerId>,
    pub winner_id: Option<PlayerId>,
    pub round: u32,
    pub rematch: u32,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            room_code: room.room_code.clone(),
            version: room.version,
            created_at: format_timestamp_ms(room.created_at_ms),
            updated_at: format_timestamp_ms(room.updated_at_ms),
            player1_id: room.player1_id.clone(),
            player1_name: room.player1_name.clone(),
            player2_id: room.player2_id.clone(),
            player2_name: room.player2_name.clone(),
            batting_player_id: room.batting_player_id.clone(),
            game_phase: room.game_phase,
            scoreboard: room.scoreboard(),
            player1_has_chosen: room.player1_choice.is_some(),
            player2_has_chosen: room.player2_choice.is_some(),
            last_batting_choice: room.last_batting_choice,
            last_bowling_choice: room.last_bowling_choice,
            out_message: room.out_message.clone(),
            negotiation: room.negotiation.clone(),
            player_left: room.player_left.clone(),
            winner_id: room.winner_id.clone(),
            round: room.round,
            rematch: room.rematch,
        }
    }
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        Self::from(&room)
    }
}

/// Returned after creating or joining a room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomJoinedResponse {
    pub room_code: String,
    /// Identifier the client must send with every later command.
    pub player_id: PlayerId,
    /// Whether the caller already sat in the room.
    pub rejoined: bool,
    pub room: RoomView,
}

/// Returned after submitting a choice.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitChoiceResponse {
    pub status: RoundStatus,
    pub path: SubmitPath,
    pub room: RoomView,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_masks_pending_choices() {
        let mut room = Room::new("ABC123".into(), "p1".into(), "Asha".into(), 0);
        room.player1_choice = Choice::try_from(4).ok();

        let json = serde_json::to_value(RoomView::from(&room)).unwrap();
        assert_eq!(json["player1_has_chosen"], true);
        assert_eq!(json["player2_has_chosen"], false);
        assert!(json.get("player1_choice").is_none());
        assert_eq!(json["created_at"], "1970-01-01T00:00:00Z");
    }

    #[test]
    fn choice_range_is_validated() {
        let request = SubmitChoiceRequest {
            player_id: "p1".into(),
            choice: 7,
            round: None,
        };
        assert!(request.validate().is_err());

        let request = CreateRoomRequest {
            player_name: "  ".into(),
            player_id: None,
        };
        assert!(request.validate().is_err());
    }
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::validate_room_code,
    state::reconciler::DerivedEvent,
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Frames accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerInboundMessage {
    /// Must be the first frame of a connection.
    Identification { room_code: String, player_id: String },
    /// Choice for the current round.
    Choice {
        choice: u8,
        #[serde(default)]
        round: Option<u32>,
    },
    RestartRequest,
    RestartAccept,
    RestartReject,
    Leave,
}

#[derive(Debug, Validate)]
struct IdentificationCheck {
    #[validate(length(min = 1, max = 16), custom(function = "validate_room_code"))]
    room_code: String,
    #[validate(length(min = 1, max = 64))]
    player_id: String,
}

#[derive(Debug, Validate)]
struct ChoiceCheck {
    #[validate(range(min = 1, max = 6))]
    choice: u8,
}

impl PlayerInboundMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, InboundError> {
        let message: Self = serde_json::from_str(text)?;
        match &message {
            Self::Identification {
                room_code,
                player_id,
            } => IdentificationCheck {
                room_code: room_code.trim().to_string(),
                player_id: player_id.clone(),
            }
            .validate()?,
            Self::Choice { choice, .. } => ChoiceCheck { choice: *choice }.validate()?,
            _ => {}
        }
        Ok(message)
    }
}

/// Reasons an inbound frame is refused.
#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid frame: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

#[derive(Debug, Serialize, ToSchema)]
/// Frames pushed to player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerOutboundMessage {
    /// Identification accepted; derived events follow.
    Identified { room_code: String, player_id: String },
    /// A command failed. `retryable` errors may simply be sent again.
    Error { message: String, retryable: bool },
    /// Derived event for the connected player.
    Event { event: DerivedEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_frames() {
        let frame = PlayerInboundMessage::from_json_str(
            r#"{"type":"identification","room_code":"ab12cd","player_id":"p1"}"#,
        )
        .unwrap();
        assert!(matches!(frame, PlayerInboundMessage::Identification { .. }));

        let frame =
            PlayerInboundMessage::from_json_str(r#"{"type":"choice","choice":4}"#).unwrap();
        assert!(matches!(
            frame,
            PlayerInboundMessage::Choice {
                choice: 4,
                round: None
            }
        ));

        let frame = PlayerInboundMessage::from_json_str(r#"{"type":"restart_accept"}"#).unwrap();
        assert!(matches!(frame, PlayerInboundMessage::RestartAccept));
    }

    #[test]
    fn rejects_out_of_range_choices_and_bad_codes() {
        assert!(matches!(
            PlayerInboundMessage::from_json_str(r#"{"type":"choice","choice":0}"#),
            Err(InboundError::Invalid(_))
        ));
        assert!(matches!(
            PlayerInboundMessage::from_json_str(
                r#"{"type":"identification","room_code":"AB-1","player_id":"p1"}"#
            ),
            Err(InboundError::Invalid(_))
        ));
        assert!(matches!(
            PlayerInboundMessage::from_json_str("not json"),
            Err(InboundError::Malformed(_))
        ));
    }

    #[test]
    fn outbound_events_nest_the_derived_event() {
        let json = serde_json::to_value(PlayerOutboundMessage::Event {
            event: DerivedEvent::InputEnabled { enabled: true },
        })
        .unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "input_enabled");
        assert_eq!(json["event"]["enabled"], true);
    }
}

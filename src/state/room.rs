//! Shared room record exchanged between the store, the room actor and every subscriber.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use utoipa::ToSchema;

/// Opaque session identifier of a participant.
pub type PlayerId = String;

/// Lowest value a player may submit.
pub const MIN_CHOICE: u8 = 1;
/// Highest value a player may submit.
pub const MAX_CHOICE: u8 = 6;

/// Wire representation of a dismissal inside a ball-by-ball sequence.
const WICKET_MARKER: &str = "W";

/// A validated prediction in the `1..=6` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "u8", into = "u8")]
#[schema(value_type = u8)]
pub struct Choice(u8);

/// Raised when a value outside `1..=6` is turned into a [`Choice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("choice must be between {MIN_CHOICE} and {MAX_CHOICE} (got {0})")]
pub struct InvalidChoice(pub u8);

impl Choice {
    /// Numeric value of the choice.
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Choice {
    type Error = InvalidChoice;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (MIN_CHOICE..=MAX_CHOICE).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidChoice(value))
        }
    }
}

impl From<Choice> for u8 {
    fn from(value: Choice) -> Self {
        value.0
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a single resolved ball for the batting player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ball {
    /// Runs scored off the ball.
    Runs(u8),
    /// The batter was dismissed.
    Wicket,
}

impl Serialize for Ball {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Ball::Runs(runs) => serializer.serialize_u8(*runs),
            Ball::Wicket => serializer.serialize_str(WICKET_MARKER),
        }
    }
}

impl<'de> Deserialize<'de> for Ball {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawBall {
            Runs(u8),
            Marker(String),
        }

        match RawBall::deserialize(deserializer)? {
            RawBall::Runs(runs) => Ok(Ball::Runs(runs)),
            RawBall::Marker(marker) if marker == WICKET_MARKER => Ok(Ball::Wicket),
            RawBall::Marker(other) => Err(serde::de::Error::custom(format!(
                "unknown ball marker `{other}`"
            ))),
        }
    }
}

/// Coarse phase of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    /// Rounds are being played.
    Playing,
    /// First innings just ended; the dismissal message is on screen.
    Dismissed,
    /// Match finished, rematch negotiation possible.
    GameOver,
}

/// Rematch negotiation sub-state, independent from [`GamePhase`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Negotiation {
    /// Nobody asked for a rematch.
    #[default]
    Idle,
    /// A player asked for a rematch and waits for the other one.
    Requested {
        /// Player that asked for the rematch.
        by: PlayerId,
    },
    /// The last request was accepted and the match restarted.
    Accepted,
}

/// One of the two seats of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSlot {
    /// Room creator.
    One,
    /// Player that joined with the room code.
    Two,
}

impl PlayerSlot {
    /// The opposite seat.
    pub fn other(self) -> Self {
        match self {
            PlayerSlot::One => PlayerSlot::Two,
            PlayerSlot::Two => PlayerSlot::One,
        }
    }
}

/// The shared, authoritative match record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Shareable code identifying the room.
    pub room_code: String,
    /// Bumped by the store on every successful write.
    #[serde(default)]
    pub version: u64,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Time of the last write, milliseconds since the Unix epoch.
    pub updated_at_ms: u64,
    /// Creator's session identifier.
    pub player1_id: PlayerId,
    /// Creator's display name.
    pub player1_name: String,
    /// Second player's identifier once someone joined.
    pub player2_id: Option<PlayerId>,
    /// Second player's display name.
    pub player2_name: Option<String>,
    /// Player currently batting.
    pub batting_player_id: PlayerId,
    /// Runs scored by the creator.
    pub player1_runs: u32,
    /// Runs scored by the second player.
    pub player2_runs: u32,
    /// Whether the creator has been dismissed.
    pub player1_out: bool,
    /// Whether the second player has been dismissed.
    pub player2_out: bool,
    /// Runs the chaser needs, set by the first dismissal.
    pub target: Option<u32>,
    /// Creator's pending choice for the current round.
    pub player1_choice: Option<Choice>,
    /// Second player's pending choice for the current round.
    pub player2_choice: Option<Choice>,
    /// Batter's choice in the last resolved round, cleared once shown.
    pub last_batting_choice: Option<Choice>,
    /// Bowler's choice in the last resolved round, cleared once shown.
    pub last_bowling_choice: Option<Choice>,
    /// Creator's innings, ball by ball.
    #[serde(default)]
    pub player1_ball_by_ball: Vec<Ball>,
    /// Second player's innings, ball by ball.
    #[serde(default)]
    pub player2_ball_by_ball: Vec<Ball>,
    /// Coarse phase of the match.
    pub game_phase: GamePhase,
    /// Dismissal or result message on display.
    pub out_message: Option<String>,
    /// Rematch negotiation state.
    #[serde(default)]
    pub negotiation: Negotiation,
    /// Player who left the room, if any.
    pub player_left: Option<PlayerId>,
    /// Resolved rounds since creation, never reset; doubles as the submission idempotency key.
    #[serde(default)]
    pub round: u32,
    /// Accepted rematches since the room was created.
    #[serde(default)]
    pub rematch: u32,
    /// Winner of a finished match.
    pub winner_id: Option<PlayerId>,
}

impl Room {
    /// Fresh room owned by its creator, who bats until an opponent joins.
    pub fn new(room_code: String, player1_id: PlayerId, player1_name: String, now_ms: u64) -> Self {
        Self {
            room_code,
            version: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            batting_player_id: player1_id.clone(),
            player1_id,
            player1_name,
            player2_id: None,
            player2_name: None,
            player1_runs: 0,
            player2_runs: 0,
            player1_out: false,
            player2_out: false,
            target: None,
            player1_choice: None,
            player2_choice: None,
            last_batting_choice: None,
            last_bowling_choice: None,
            player1_ball_by_ball: Vec::new(),
            player2_ball_by_ball: Vec::new(),
            game_phase: GamePhase::Playing,
            out_message: None,
            negotiation: Negotiation::Idle,
            player_left: None,
            round: 0,
            rematch: 0,
            winner_id: None,
        }
    }

    /// Seat occupied by `player_id`, if any.
    pub fn slot_of(&self, player_id: &str) -> Option<PlayerSlot> {
        if self.player1_id == player_id {
            Some(PlayerSlot::One)
        } else if self.player2_id.as_deref() == Some(player_id) {
            Some(PlayerSlot::Two)
        } else {
            None
        }
    }

    /// Identifier of the player in `slot`.
    pub fn player_id(&self, slot: PlayerSlot) -> Option<&str> {
        match slot {
            PlayerSlot::One => Some(self.player1_id.as_str()),
            PlayerSlot::Two => self.player2_id.as_deref(),
        }
    }

    /// Display name of the player in `slot`, with the same placeholders the UI uses.
    pub fn display_name(&self, slot: PlayerSlot) -> &str {
        match slot {
            PlayerSlot::One if !self.player1_name.is_empty() => &self.player1_name,
            PlayerSlot::One => "Player 1",
            PlayerSlot::Two => self
                .player2_name
                .as_deref()
                .filter(|name| !name.is_empty())
                .unwrap_or("Player 2"),
        }
    }

    /// Runs scored by `slot`.
    pub fn runs(&self, slot: PlayerSlot) -> u32 {
        match slot {
            PlayerSlot::One => self.player1_runs,
            PlayerSlot::Two => self.player2_runs,
        }
    }

    /// Whether `slot` has been dismissed.
    pub fn is_out(&self, slot: PlayerSlot) -> bool {
        match slot {
            PlayerSlot::One => self.player1_out,
            PlayerSlot::Two => self.player2_out,
        }
    }

    /// Pending choice of `slot`.
    pub fn choice(&self, slot: PlayerSlot) -> Option<Choice> {
        match slot {
            PlayerSlot::One => self.player1_choice,
            PlayerSlot::Two => self.player2_choice,
        }
    }

    /// Ball-by-ball sequence of `slot`.
    pub fn balls(&self, slot: PlayerSlot) -> &[Ball] {
        match slot {
            PlayerSlot::One => &self.player1_ball_by_ball,
            PlayerSlot::Two => &self.player2_ball_by_ball,
        }
    }

    /// Seat of the batting player. A stale identifier falls back to the creator.
    pub fn batting_slot(&self) -> PlayerSlot {
        self.slot_of(&self.batting_player_id)
            .unwrap_or(PlayerSlot::One)
    }

    /// Whether both seats are taken.
    pub fn is_full(&self) -> bool {
        self.player2_id.is_some()
    }

    /// Whether no submission is pending for either player.
    pub fn choices_cleared(&self) -> bool {
        self.player1_choice.is_none() && self.player2_choice.is_none()
    }

    /// Public scoreboard projection, without pending choices.
    pub fn scoreboard(&self) -> Scoreboard {
        let batting = self.batting_slot();
        let players = [PlayerSlot::One, PlayerSlot::Two]
            .into_iter()
            .filter_map(|slot| {
                let id = self.player_id(slot)?;
                Some(ScoreLine {
                    player_id: id.to_string(),
                    name: self.display_name(slot).to_string(),
                    runs: self.runs(slot),
                    out: self.is_out(slot),
                    batting: slot == batting,
                    ball_by_ball: self.balls(slot).to_vec(),
                })
            })
            .collect();

        Scoreboard {
            target: self.target,
            players,
        }
    }

    /// Apply a partial update in place. Version and timestamps are left to the store.
    pub fn apply(&mut self, patch: &RoomPatch) {
        if let Some(value) = &patch.player2_id {
            self.player2_id = Some(value.clone());
        }
        if let Some(value) = &patch.player2_name {
            self.player2_name = Some(value.clone());
        }
        if let Some(value) = &patch.batting_player_id {
            self.batting_player_id = value.clone();
        }
        if let Some(value) = patch.player1_runs {
            self.player1_runs = value;
        }
        if let Some(value) = patch.player2_runs {
            self.player2_runs = value;
        }
        if let Some(value) = patch.player1_out {
            self.player1_out = value;
        }
        if let Some(value) = patch.player2_out {
            self.player2_out = value;
        }
        if let Some(value) = patch.target {
            self.target = value;
        }
        if let Some(value) = patch.player1_choice {
            self.player1_choice = value;
        }
        if let Some(value) = patch.player2_choice {
            self.player2_choice = value;
        }
        if let Some(value) = patch.last_batting_choice {
            self.last_batting_choice = value;
        }
        if let Some(value) = patch.last_bowling_choice {
            self.last_bowling_choice = value;
        }
        if let Some(value) = &patch.player1_ball_by_ball {
            self.player1_ball_by_ball = value.clone();
        }
        if let Some(value) = &patch.player2_ball_by_ball {
            self.player2_ball_by_ball = value.clone();
        }
        if let Some(value) = patch.game_phase {
            self.game_phase = value;
        }
        if let Some(value) = &patch.out_message {
            self.out_message = value.clone();
        }
        if let Some(value) = &patch.negotiation {
            self.negotiation = value.clone();
        }
        if let Some(value) = &patch.player_left {
            self.player_left = value.clone();
        }
        if let Some(value) = patch.round {
            self.round = value;
        }
        if let Some(value) = patch.rematch {
            self.rematch = value;
        }
        if let Some(value) = &patch.winner_id {
            self.winner_id = value.clone();
        }
    }
}

/// Targeted partial update of a [`Room`].
///
/// `None` leaves a field untouched; for nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    /// Reject the write unless the stored version still matches.
    pub expected_version: Option<u64>,
    /// Seat the second player.
    pub player2_id: Option<PlayerId>,
    /// Second player's display name.
    pub player2_name: Option<String>,
    /// New batter.
    pub batting_player_id: Option<PlayerId>,
    /// Creator's runs.
    pub player1_runs: Option<u32>,
    /// Second player's runs.
    pub player2_runs: Option<u32>,
    /// Creator's dismissal flag.
    pub player1_out: Option<bool>,
    /// Second player's dismissal flag.
    pub player2_out: Option<bool>,
    /// Chase target.
    pub target: Option<Option<u32>>,
    /// Creator's pending choice.
    pub player1_choice: Option<Option<Choice>>,
    /// Second player's pending choice.
    pub player2_choice: Option<Option<Choice>>,
    /// Batter's revealed choice.
    pub last_batting_choice: Option<Option<Choice>>,
    /// Bowler's revealed choice.
    pub last_bowling_choice: Option<Option<Choice>>,
    /// Creator's ball-by-ball sequence.
    pub player1_ball_by_ball: Option<Vec<Ball>>,
    /// Second player's ball-by-ball sequence.
    pub player2_ball_by_ball: Option<Vec<Ball>>,
    /// Match phase.
    pub game_phase: Option<GamePhase>,
    /// Message on display.
    pub out_message: Option<Option<String>>,
    /// Rematch negotiation state.
    pub negotiation: Option<Negotiation>,
    /// Departed player.
    pub player_left: Option<Option<PlayerId>>,
    /// Resolved round counter.
    pub round: Option<u32>,
    /// Rematch counter.
    pub rematch: Option<u32>,
    /// Match winner.
    pub winner_id: Option<Option<PlayerId>>,
}

impl RoomPatch {
    /// Patch recording (or clearing) the pending choice of one seat.
    pub fn choice(slot: PlayerSlot, choice: Option<Choice>) -> Self {
        let mut patch = Self::default();
        patch.set_choice(slot, choice);
        patch
    }

    /// True when applying the patch would not change any field.
    pub fn is_noop(&self) -> bool {
        *self
            == Self {
                expected_version: self.expected_version,
                ..Self::default()
            }
    }

    /// Attach an optimistic concurrency precondition.
    pub fn expecting(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Set the runs of `slot`.
    pub fn set_runs(&mut self, slot: PlayerSlot, runs: u32) {
        match slot {
            PlayerSlot::One => self.player1_runs = Some(runs),
            PlayerSlot::Two => self.player2_runs = Some(runs),
        }
    }

    /// Set the dismissal flag of `slot`.
    pub fn set_out(&mut self, slot: PlayerSlot, out: bool) {
        match slot {
            PlayerSlot::One => self.player1_out = Some(out),
            PlayerSlot::Two => self.player2_out = Some(out),
        }
    }

    /// Record or clear the pending choice of `slot`.
    pub fn set_choice(&mut self, slot: PlayerSlot, choice: Option<Choice>) {
        match slot {
            PlayerSlot::One => self.player1_choice = Some(choice),
            PlayerSlot::Two => self.player2_choice = Some(choice),
        }
    }

    /// Replace the ball-by-ball sequence of `slot`.
    pub fn set_balls(&mut self, slot: PlayerSlot, balls: Vec<Ball>) {
        match slot {
            PlayerSlot::One => self.player1_ball_by_ball = Some(balls),
            PlayerSlot::Two => self.player2_ball_by_ball = Some(balls),
        }
    }
}

/// Per-player line of the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScoreLine {
    /// Player this line belongs to.
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Runs scored.
    pub runs: u32,
    /// Whether the player was dismissed.
    pub out: bool,
    /// Whether the player is batting now.
    pub batting: bool,
    /// Runs per ball, `"W"` marking the dismissal.
    #[schema(value_type = Vec<Object>)]
    pub ball_by_ball: Vec<Ball>,
}

/// Snapshot of both innings as shown to players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Scoreboard {
    /// Chase target, once set.
    pub target: Option<u32>,
    /// Both seats, creator first.
    pub players: Vec<ScoreLine>,
}

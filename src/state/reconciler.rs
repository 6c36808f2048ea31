//! Per-player projection of room notifications into UI-facing events.
//!
//! Every connected player owns one [`SessionReconciler`]. The change feed
//! delivers full room records at least once and possibly out of order; the
//! reconciler drops anything not newer than what it already applied and turns
//! the difference between consecutive snapshots into [`DerivedEvent`]s.

use serde::Serialize;
use utoipa::ToSchema;

use crate::state::room::{Choice, GamePhase, Negotiation, PlayerId, PlayerSlot, Room, Scoreboard};

const SIX: u8 = 6;

/// Audio cue the UI plays alongside an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Sound {
    /// A batter got out.
    Boo,
    /// A six was hit.
    Yay,
    /// The match ended.
    CrowdCheer,
}

/// Rematch negotiation as seen by one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationView {
    /// No request pending.
    Idle,
    /// This player asked and waits for the opponent.
    RequestedByMe,
    /// The opponent asked; this player may accept or reject.
    RequestedByOpponent,
    /// The last request was accepted.
    Accepted,
}

/// One side of a revealed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RevealedChoice {
    /// Value the player picked.
    pub choice: Choice,
    /// Whether the player was batting for that ball.
    pub batting: bool,
}

/// Event derived from a room notification, scoped to one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DerivedEvent {
    /// Latest phase and scoreboard; emitted for every applied notification.
    StateChanged {
        /// Current phase.
        phase: GamePhase,
        /// Scores, ball histories and target.
        scoreboard: Scoreboard,
    },
    /// A rematch was accepted and a fresh match begins.
    RematchStarted,
    /// The opponent took the second seat.
    OpponentJoined {
        /// Opponent display name.
        name: String,
    },
    /// Both choices of a resolved round can be shown.
    ChoiceReveal {
        /// Round the pair belongs to.
        round: u32,
        /// Player one's side.
        player1: RevealedChoice,
        /// Player two's side.
        player2: RevealedChoice,
        /// Whether the ball dismissed the batter.
        out: bool,
        /// Runs scored off the ball.
        runs: u8,
    },
    /// Audio cue.
    SoundCue {
        /// Which sound to play.
        sound: Sound,
    },
    /// The opponent left the room.
    OpponentDeparted,
    /// First innings ended; show the target message.
    DismissalMessage {
        /// Message to display.
        message: String,
    },
    /// The match ended.
    Victory {
        /// Winning player, when known.
        winner_id: Option<PlayerId>,
        /// Summary message.
        message: Option<String>,
        /// Whether the local player won.
        you_won: bool,
    },
    /// Rematch negotiation changed.
    Negotiation {
        /// Negotiation from the local player's point of view.
        view: NegotiationView,
    },
    /// Whether the local player may submit a choice.
    InputEnabled {
        /// Gate value.
        enabled: bool,
    },
}

impl DerivedEvent {
    /// Stable event name, used for SSE event types.
    pub fn kind(&self) -> &'static str {
        match self {
            DerivedEvent::StateChanged { .. } => "state_changed",
            DerivedEvent::RematchStarted => "rematch_started",
            DerivedEvent::OpponentJoined { .. } => "opponent_joined",
            DerivedEvent::ChoiceReveal { .. } => "choice_reveal",
            DerivedEvent::SoundCue { .. } => "sound_cue",
            DerivedEvent::OpponentDeparted => "opponent_departed",
            DerivedEvent::DismissalMessage { .. } => "dismissal_message",
            DerivedEvent::Victory { .. } => "victory",
            DerivedEvent::Negotiation { .. } => "negotiation",
            DerivedEvent::InputEnabled { .. } => "input_enabled",
        }
    }
}

/// Client-side view of a room for one player.
#[derive(Debug, Clone)]
pub struct SessionReconciler {
    player_id: PlayerId,
    previous: Option<Room>,
    input_enabled: bool,
    victory_shown: bool,
    departure_shown: bool,
    negotiation: Option<NegotiationView>,
}

impl SessionReconciler {
    /// Reconciler for `player_id`; input starts disabled until a snapshot allows it.
    pub fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            previous: None,
            input_enabled: false,
            victory_shown: false,
            departure_shown: false,
            negotiation: None,
        }
    }

    /// Player this reconciler projects for.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Last applied snapshot.
    pub fn current(&self) -> Option<&Room> {
        self.previous.as_ref()
    }

    /// Current state of the input gate.
    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    /// Apply a delivered room record. Stale and duplicate deliveries yield nothing.
    pub fn on_notification(&mut self, room: &Room) -> Vec<DerivedEvent> {
        if self
            .previous
            .as_ref()
            .is_some_and(|previous| room.version <= previous.version)
        {
            return Vec::new();
        }

        let previous = self.previous.take();
        let mut events = vec![DerivedEvent::StateChanged {
            phase: room.game_phase,
            scoreboard: room.scoreboard(),
        }];

        if previous
            .as_ref()
            .is_some_and(|previous| room.rematch > previous.rematch)
        {
            self.victory_shown = false;
            self.departure_shown = false;
            events.push(DerivedEvent::RematchStarted);
        }
        if room.game_phase != GamePhase::GameOver {
            self.victory_shown = false;
        }

        if let Some(name) = self.joined_opponent(previous.as_ref(), room) {
            events.push(DerivedEvent::OpponentJoined { name });
        }

        events.extend(reveal(previous.as_ref(), room));

        if let Some(left) = &room.player_left {
            if *left != self.player_id && !self.departure_shown {
                self.departure_shown = true;
                events.push(DerivedEvent::OpponentDeparted);
            }
        }

        let entered_dismissal = room.game_phase == GamePhase::Dismissed
            && previous
                .as_ref()
                .is_none_or(|previous| previous.game_phase != GamePhase::Dismissed);
        if entered_dismissal {
            if let Some(message) = room.out_message.as_ref().filter(|m| !m.is_empty()) {
                events.push(DerivedEvent::DismissalMessage {
                    message: message.clone(),
                });
            }
        }

        if room.game_phase == GamePhase::GameOver && !self.victory_shown {
            self.victory_shown = true;
            events.push(DerivedEvent::SoundCue {
                sound: Sound::CrowdCheer,
            });
            events.push(DerivedEvent::Victory {
                winner_id: room.winner_id.clone(),
                message: room.out_message.clone(),
                you_won: room.winner_id.as_deref() == Some(self.player_id.as_str()),
            });
        }

        let view = self.negotiation_view(&room.negotiation);
        if self.negotiation != Some(view) {
            self.negotiation = Some(view);
            events.push(DerivedEvent::Negotiation { view });
        }

        let gate = input_gate(room);
        if gate != self.input_enabled {
            self.input_enabled = gate;
            events.push(DerivedEvent::InputEnabled { enabled: gate });
        }

        self.previous = Some(room.clone());
        events
    }

    /// Disable input right after a submission leaves this client.
    pub fn mark_submitted(&mut self) -> Option<DerivedEvent> {
        if !self.input_enabled {
            return None;
        }
        self.input_enabled = false;
        Some(DerivedEvent::InputEnabled { enabled: false })
    }

    /// Re-enable input after a submission the store never received, when the last snapshot allows it.
    pub fn submission_failed(&mut self) -> Option<DerivedEvent> {
        let gate = self.previous.as_ref().is_some_and(input_gate);
        if gate == self.input_enabled {
            return None;
        }
        self.input_enabled = gate;
        Some(DerivedEvent::InputEnabled { enabled: gate })
    }

    fn joined_opponent(&self, previous: Option<&Room>, room: &Room) -> Option<String> {
        let slot = room.slot_of(&self.player_id)?.other();
        let opponent = room.player_id(slot)?;
        let known = previous
            .and_then(|previous| previous.player_id(slot))
            .is_some_and(|id| id == opponent);
        if known {
            None
        } else {
            Some(room.display_name(slot).to_string())
        }
    }

    fn negotiation_view(&self, negotiation: &Negotiation) -> NegotiationView {
        match negotiation {
            Negotiation::Idle => NegotiationView::Idle,
            Negotiation::Requested { by } if *by == self.player_id => NegotiationView::RequestedByMe,
            Negotiation::Requested { .. } => NegotiationView::RequestedByOpponent,
            Negotiation::Accepted => NegotiationView::Accepted,
        }
    }
}

/// Input is open only between rounds of a live match with both seats taken.
fn input_gate(room: &Room) -> bool {
    room.choices_cleared()
        && room.game_phase == GamePhase::Playing
        && room.is_full()
        && room.player_left.is_none()
}

/// Reveal events for a pair that `previous` did not show yet.
fn reveal(previous: Option<&Room>, room: &Room) -> Vec<DerivedEvent> {
    let (Some(batting), Some(bowling)) = (room.last_batting_choice, room.last_bowling_choice)
    else {
        return Vec::new();
    };
    let already_shown = previous
        .is_some_and(|previous| previous.last_batting_choice.is_some() && previous.round == room.round);
    if already_shown {
        return Vec::new();
    }

    // Roles as they were when the ball was bowled; a dismissal flips the batter.
    // A first snapshot has no earlier roles, so the current batter stands in.
    let batter = previous.map_or_else(|| room.batting_slot(), Room::batting_slot);
    let side = |slot: PlayerSlot| {
        if slot == batter {
            RevealedChoice {
                choice: batting,
                batting: true,
            }
        } else {
            RevealedChoice {
                choice: bowling,
                batting: false,
            }
        }
    };

    let out = batting == bowling;
    let runs = if out { 0 } else { batting.value() };
    let mut events = vec![DerivedEvent::ChoiceReveal {
        round: room.round,
        player1: side(PlayerSlot::One),
        player2: side(PlayerSlot::Two),
        out,
        runs,
    }];
    if out {
        events.push(DerivedEvent::SoundCue { sound: Sound::Boo });
    } else if runs == SIX {
        events.push(DerivedEvent::SoundCue { sound: Sound::Yay });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::resolver;

    fn choice(value: u8) -> Choice {
        Choice::try_from(value).unwrap()
    }

    fn full_room() -> Room {
        let mut room = Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0);
        room.player2_id = Some("p2".into());
        room.player2_name = Some("Ravi".into());
        room.version = 1;
        room
    }

    fn resolved(room: &Room, batting: u8, bowling: u8) -> Room {
        let mut next = room.clone();
        next.apply(&resolver::resolve(room, choice(batting), choice(bowling)));
        next.version += 1;
        next
    }

    fn kinds(events: &[DerivedEvent]) -> Vec<&'static str> {
        events.iter().map(DerivedEvent::kind).collect()
    }

    #[test]
    fn duplicate_and_stale_notifications_are_ignored() {
        let mut session = SessionReconciler::new("p1".into());
        let room = full_room();
        assert!(!session.on_notification(&room).is_empty());
        assert!(session.on_notification(&room).is_empty());

        let mut older = room.clone();
        older.version = 0;
        assert!(session.on_notification(&older).is_empty());
    }

    #[test]
    fn first_snapshot_opens_input_and_announces_opponent() {
        let mut session = SessionReconciler::new("p1".into());
        let events = session.on_notification(&full_room());

        assert!(events.contains(&DerivedEvent::OpponentJoined {
            name: "Ravi".into()
        }));
        assert!(events.contains(&DerivedEvent::InputEnabled { enabled: true }));
        assert!(session.input_enabled());
    }

    #[test]
    fn input_stays_closed_until_both_choices_clear() {
        let mut session = SessionReconciler::new("p1".into());
        let mut room = full_room();
        session.on_notification(&room);

        assert_eq!(
            session.mark_submitted(),
            Some(DerivedEvent::InputEnabled { enabled: false })
        );

        room.player1_choice = Some(choice(3));
        room.version += 1;
        let events = session.on_notification(&room);
        assert!(!kinds(&events).contains(&"input_enabled"));

        let next = resolved(&room, 3, 5);
        let events = session.on_notification(&next);
        assert!(events.contains(&DerivedEvent::InputEnabled { enabled: true }));
    }

    #[test]
    fn failed_submission_reopens_input() {
        let mut session = SessionReconciler::new("p2".into());
        session.on_notification(&full_room());
        session.mark_submitted();
        assert_eq!(
            session.submission_failed(),
            Some(DerivedEvent::InputEnabled { enabled: true })
        );
        assert_eq!(session.submission_failed(), None);
    }

    #[test]
    fn reveal_uses_roles_from_before_the_dismissal() {
        let mut session = SessionReconciler::new("p2".into());
        let room = full_room();
        session.on_notification(&room);

        let next = resolved(&room, 3, 3);
        assert_eq!(next.batting_player_id, "p2");
        let events = session.on_notification(&next);

        let reveal = events
            .iter()
            .find(|event| event.kind() == "choice_reveal")
            .cloned();
        assert_eq!(
            reveal,
            Some(DerivedEvent::ChoiceReveal {
                round: 1,
                player1: RevealedChoice {
                    choice: choice(3),
                    batting: true,
                },
                player2: RevealedChoice {
                    choice: choice(3),
                    batting: false,
                },
                out: true,
                runs: 0,
            })
        );
        assert!(events.contains(&DerivedEvent::SoundCue { sound: Sound::Boo }));
        assert!(events.contains(&DerivedEvent::DismissalMessage {
            message: "Asha is OUT! Target: 1 runs".into()
        }));
    }

    #[test]
    fn reveal_is_shown_once_per_round() {
        let mut session = SessionReconciler::new("p1".into());
        let room = full_room();
        session.on_notification(&room);

        let next = resolved(&room, 6, 2);
        let events = session.on_notification(&next);
        assert!(kinds(&events).contains(&"choice_reveal"));
        assert!(events.contains(&DerivedEvent::SoundCue { sound: Sound::Yay }));

        let mut touched = next.clone();
        touched.version += 1;
        touched.player2_choice = Some(choice(1));
        assert!(!kinds(&session.on_notification(&touched)).contains(&"choice_reveal"));
    }

    #[test]
    fn first_snapshot_reveals_pending_last_choices() {
        let room = full_room();
        let next = resolved(&room, 4, 2);

        let mut session = SessionReconciler::new("p2".into());
        let events = session.on_notification(&next);
        let reveal = events
            .iter()
            .find(|event| event.kind() == "choice_reveal")
            .cloned();
        assert_eq!(
            reveal,
            Some(DerivedEvent::ChoiceReveal {
                round: 1,
                player1: RevealedChoice {
                    choice: choice(4),
                    batting: true,
                },
                player2: RevealedChoice {
                    choice: choice(2),
                    batting: false,
                },
                out: false,
                runs: 4,
            })
        );
    }

    #[test]
    fn victory_and_departure_fire_once() {
        let mut session = SessionReconciler::new("p1".into());
        let mut room = full_room();
        room.batting_player_id = "p2".into();
        room.target = Some(3);
        session.on_notification(&room);

        let over = resolved(&room, 4, 1);
        let events = session.on_notification(&over);
        assert!(events.contains(&DerivedEvent::Victory {
            winner_id: Some("p2".into()),
            message: Some("Ravi Wins!".into()),
            you_won: false,
        }));
        assert!(events.contains(&DerivedEvent::SoundCue {
            sound: Sound::CrowdCheer
        }));

        let mut left = over.clone();
        left.version += 1;
        left.player_left = Some("p2".into());
        let events = session.on_notification(&left);
        assert!(!kinds(&events).contains(&"victory"));
        assert!(kinds(&events).contains(&"opponent_departed"));

        let mut again = left.clone();
        again.version += 1;
        assert!(!kinds(&session.on_notification(&again)).contains(&"opponent_departed"));
    }

    #[test]
    fn own_departure_is_not_announced() {
        let mut session = SessionReconciler::new("p1".into());
        let mut room = full_room();
        room.player_left = Some("p1".into());
        assert!(!kinds(&session.on_notification(&room)).contains(&"opponent_departed"));
    }

    #[test]
    fn negotiation_view_is_relative_to_the_player() {
        let mut mine = SessionReconciler::new("p1".into());
        let mut theirs = SessionReconciler::new("p2".into());
        let mut room = full_room();
        room.game_phase = GamePhase::GameOver;
        room.negotiation = Negotiation::Requested { by: "p1".into() };

        assert!(mine.on_notification(&room).contains(&DerivedEvent::Negotiation {
            view: NegotiationView::RequestedByMe
        }));
        assert!(theirs.on_notification(&room).contains(&DerivedEvent::Negotiation {
            view: NegotiationView::RequestedByOpponent
        }));
    }

    #[test]
    fn rematch_counter_edge_starts_a_new_match() {
        let mut session = SessionReconciler::new("p1".into());
        let mut room = full_room();
        room.game_phase = GamePhase::GameOver;
        room.winner_id = Some("p1".into());
        session.on_notification(&room);

        let mut rematch = room.clone();
        rematch.version += 1;
        rematch.rematch = 1;
        rematch.game_phase = GamePhase::Playing;
        rematch.winner_id = None;
        rematch.negotiation = Negotiation::Accepted;
        let events = session.on_notification(&rematch);

        assert!(events.contains(&DerivedEvent::RematchStarted));
        assert!(events.contains(&DerivedEvent::Negotiation {
            view: NegotiationView::Accepted
        }));
        assert!(events.contains(&DerivedEvent::InputEnabled { enabled: true }));

        let mut over = rematch.clone();
        over.version += 1;
        over.game_phase = GamePhase::GameOver;
        assert!(kinds(&session.on_notification(&over)).contains(&"victory"));
    }
}

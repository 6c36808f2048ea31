use rand::Rng;
use thiserror::Error;

use crate::state::{
    resolver,
    room::{Ball, Choice, GamePhase, Negotiation, PlayerId, Room, RoomPatch},
};

/// Events that can be applied to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// A second player takes the empty seat.
    PlayerJoined {
        /// Identifier of the joining player.
        player_id: PlayerId,
        /// Display name chosen by the joining player.
        name: String,
        /// Player drawn to bat first.
        opening_batter: PlayerId,
    },
    /// Both choices are in; the resolver decides the ball.
    RoundResolved {
        /// Value played by the batter.
        batting: Choice,
        /// Value played by the bowler.
        bowling: Choice,
    },
    /// The dismissal message was displayed long enough.
    DismissalShown,
    /// The reveal of `round` was displayed long enough.
    RevealShown {
        /// Round whose pair is being hidden.
        round: u32,
    },
    /// A player asks for a rematch.
    RestartRequested {
        /// Requesting player.
        by: PlayerId,
    },
    /// The other player agrees to the rematch.
    RestartAccepted {
        /// Accepting player.
        by: PlayerId,
        /// Player drawn to bat first in the new match.
        opening_batter: PlayerId,
    },
    /// The other player declines the rematch and leaves.
    RestartRejected {
        /// Rejecting player.
        by: PlayerId,
    },
    /// A player left the room explicitly.
    PlayerLeft {
        /// Departing player.
        player_id: PlayerId,
    },
}

/// Phase and negotiation sub-state of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    /// Coarse match phase.
    pub phase: GamePhase,
    /// Rematch negotiation sub-state.
    pub negotiation: Negotiation,
}

impl RoomStatus {
    fn of(room: &Room) -> Self {
        Self {
            phase: room.game_phase,
            negotiation: room.negotiation.clone(),
        }
    }
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The status the room was in when the invalid event was received.
    pub from: RoomStatus,
    /// The event that cannot be applied from this status.
    pub event: RoomEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// The event is not valid from the current status.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// The acting player does not sit in this room.
    #[error("player `{0}` is not part of this room")]
    NotAMember(PlayerId),
    /// A player already left; the match instance is over.
    #[error("room is closed: player `{0}` left")]
    RoomClosed(PlayerId),
}

/// A validated transition, ready to be written with a version precondition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Status of the room the plan was computed from.
    pub from: RoomStatus,
    /// Status once the patch is applied.
    pub to: RoomStatus,
    /// Event that triggered this transition.
    pub event: RoomEvent,
    /// Room version the plan was computed against.
    pub version: u64,
    /// Update to write; carries `version` as its precondition.
    pub patch: RoomPatch,
}

impl Plan {
    /// Whether the transition changes nothing (idempotent repeats).
    pub fn is_noop(&self) -> bool {
        self.patch.is_noop()
    }
}

/// Room phase transitions plus the rematch negotiation, computed over a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct RoomStateMachine<'a> {
    room: &'a Room,
}

impl<'a> RoomStateMachine<'a> {
    /// Wrap a room snapshot.
    pub fn new(room: &'a Room) -> Self {
        Self { room }
    }

    /// Current phase and negotiation.
    pub fn status(&self) -> RoomStatus {
        RoomStatus::of(self.room)
    }

    /// Validate `event` against the snapshot and compute the resulting patch.
    pub fn plan(&self, event: RoomEvent) -> Result<Plan, PlanError> {
        let patch = self
            .compute_transition(&event)?
            .expecting(self.room.version);

        let mut next = self.room.clone();
        next.apply(&patch);

        Ok(Plan {
            from: self.status(),
            to: RoomStatus::of(&next),
            event,
            version: self.room.version,
            patch,
        })
    }

    fn invalid(&self, event: &RoomEvent) -> PlanError {
        PlanError::InvalidTransition(InvalidTransition {
            from: self.status(),
            event: event.clone(),
        })
    }

    fn ensure_member(&self, player_id: &str) -> Result<(), PlanError> {
        match self.room.slot_of(player_id) {
            Some(_) => Ok(()),
            None => Err(PlanError::NotAMember(player_id.to_string())),
        }
    }

    fn ensure_open(&self) -> Result<(), PlanError> {
        match &self.room.player_left {
            Some(left) => Err(PlanError::RoomClosed(left.clone())),
            None => Ok(()),
        }
    }

    fn compute_transition(&self, event: &RoomEvent) -> Result<RoomPatch, PlanError> {
        let room = self.room;
        let patch = match (room.game_phase, &room.negotiation, event) {
            (
                _,
                _,
                RoomEvent::PlayerJoined {
                    player_id,
                    name,
                    opening_batter,
                },
            ) => {
                self.ensure_open()?;
                if room.is_full() || *player_id == room.player1_id {
                    return Err(self.invalid(event));
                }
                RoomPatch {
                    player2_id: Some(player_id.clone()),
                    player2_name: Some(name.clone()),
                    batting_player_id: Some(opening_batter.clone()),
                    ..RoomPatch::default()
                }
            }
            (GamePhase::Playing, _, RoomEvent::RoundResolved { batting, bowling }) => {
                self.ensure_open()?;
                resolver::resolve(room, *batting, *bowling)
            }
            (GamePhase::Dismissed, _, RoomEvent::DismissalShown) => RoomPatch {
                game_phase: Some(GamePhase::Playing),
                out_message: Some(None),
                ..RoomPatch::default()
            },
            // Both clients run the timer; whoever fires second finds nothing to do.
            (_, _, RoomEvent::DismissalShown) => RoomPatch::default(),
            (_, _, RoomEvent::RevealShown { round }) => {
                if *round == room.round && room.last_batting_choice.is_some() {
                    RoomPatch {
                        last_batting_choice: Some(None),
                        last_bowling_choice: Some(None),
                        ..RoomPatch::default()
                    }
                } else {
                    RoomPatch::default()
                }
            }
            (
                GamePhase::GameOver,
                Negotiation::Idle | Negotiation::Accepted,
                RoomEvent::RestartRequested { by },
            ) => {
                self.ensure_member(by)?;
                self.ensure_open()?;
                RoomPatch {
                    negotiation: Some(Negotiation::Requested { by: by.clone() }),
                    ..RoomPatch::default()
                }
            }
            (
                GamePhase::GameOver,
                Negotiation::Requested { by: requester },
                RoomEvent::RestartRequested { by },
            ) if requester == by => RoomPatch::default(),
            (
                GamePhase::GameOver,
                Negotiation::Requested { by: requester },
                RoomEvent::RestartAccepted { by, opening_batter },
            ) if requester != by => {
                self.ensure_member(by)?;
                self.ensure_open()?;
                self.rematch_reset(opening_batter)
            }
            (
                GamePhase::GameOver,
                Negotiation::Requested { by: requester },
                RoomEvent::RestartRejected { by },
            ) if requester != by => {
                self.ensure_member(by)?;
                self.ensure_open()?;
                RoomPatch {
                    negotiation: Some(Negotiation::Idle),
                    player_left: Some(Some(by.clone())),
                    ..RoomPatch::default()
                }
            }
            (_, negotiation, RoomEvent::PlayerLeft { player_id }) => {
                self.ensure_member(player_id)?;
                if room.player_left.is_some() {
                    return Ok(RoomPatch::default());
                }
                let mut patch = RoomPatch {
                    player_left: Some(Some(player_id.clone())),
                    ..RoomPatch::default()
                };
                if matches!(negotiation, Negotiation::Requested { .. }) {
                    patch.negotiation = Some(Negotiation::Idle);
                }
                patch
            }
            _ => return Err(self.invalid(event)),
        };

        Ok(patch)
    }

    fn rematch_reset(&self, opening_batter: &str) -> RoomPatch {
        let no_balls: Vec<Ball> = Vec::new();
        RoomPatch {
            batting_player_id: Some(opening_batter.to_string()),
            player1_runs: Some(0),
            player2_runs: Some(0),
            player1_out: Some(false),
            player2_out: Some(false),
            target: Some(None),
            player1_choice: Some(None),
            player2_choice: Some(None),
            last_batting_choice: Some(None),
            last_bowling_choice: Some(None),
            player1_ball_by_ball: Some(no_balls.clone()),
            player2_ball_by_ball: Some(no_balls),
            game_phase: Some(GamePhase::Playing),
            out_message: Some(None),
            negotiation: Some(Negotiation::Accepted),
            rematch: Some(self.room.rematch + 1),
            winner_id: Some(None),
            ..RoomPatch::default()
        }
    }
}

/// Draw the opening batter 50/50 between the two players.
pub fn pick_opening_batter<R: Rng + ?Sized>(first: &str, second: &str, rng: &mut R) -> PlayerId {
    if rng.random_bool(0.5) {
        first.to_string()
    } else {
        second.to_string()
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn choice(value: u8) -> Choice {
        Choice::try_from(value).unwrap()
    }

    fn apply(room: &mut Room, event: RoomEvent) -> RoomStatus {
        let plan = RoomStateMachine::new(room).plan(event).unwrap();
        room.apply(&plan.patch);
        room.version += 1;
        plan.to
    }

    fn lobby() -> Room {
        Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0)
    }

    fn joined() -> Room {
        let mut room = lobby();
        apply(
            &mut room,
            RoomEvent::PlayerJoined {
                player_id: "p2".into(),
                name: "Ravi".into(),
                opening_batter: "p1".into(),
            },
        );
        room
    }

    fn finished() -> Room {
        let mut room = joined();
        room.target = Some(5);
        room.player1_out = true;
        room.batting_player_id = "p2".into();
        apply(
            &mut room,
            RoomEvent::RoundResolved {
                batting: choice(6),
                bowling: choice(1),
            },
        );
        room
    }

    #[test]
    fn initial_status_is_playing_and_idle() {
        let room = lobby();
        assert_eq!(
            RoomStateMachine::new(&room).status(),
            RoomStatus {
                phase: GamePhase::Playing,
                negotiation: Negotiation::Idle,
            }
        );
    }

    #[test]
    fn full_path_through_both_innings_and_rematch() {
        let mut room = joined();
        assert_eq!(room.player2_name.as_deref(), Some("Ravi"));

        let status = apply(
            &mut room,
            RoomEvent::RoundResolved {
                batting: choice(2),
                bowling: choice(2),
            },
        );
        assert_eq!(status.phase, GamePhase::Dismissed);

        let status = apply(&mut room, RoomEvent::DismissalShown);
        assert_eq!(status.phase, GamePhase::Playing);
        assert_eq!(room.out_message, None);

        let status = apply(
            &mut room,
            RoomEvent::RoundResolved {
                batting: choice(1),
                bowling: choice(3),
            },
        );
        assert_eq!(status.phase, GamePhase::GameOver);
        assert_eq!(room.winner_id.as_deref(), Some("p2"));

        let status = apply(&mut room, RoomEvent::RestartRequested { by: "p1".into() });
        assert_eq!(
            status.negotiation,
            Negotiation::Requested { by: "p1".into() }
        );

        let status = apply(
            &mut room,
            RoomEvent::RestartAccepted {
                by: "p2".into(),
                opening_batter: "p2".into(),
            },
        );
        assert_eq!(status.phase, GamePhase::Playing);
        assert_eq!(status.negotiation, Negotiation::Accepted);
        assert_eq!(room.rematch, 1);
        assert_eq!(room.batting_player_id, "p2");
        assert_eq!(room.target, None);
        assert_eq!((room.player1_runs, room.player2_runs), (0, 0));
        assert!(!room.player1_out && !room.player2_out);
        assert!(room.player1_ball_by_ball.is_empty() && room.player2_ball_by_ball.is_empty());
        assert_eq!(room.winner_id, None);
        assert_eq!(room.round, 2);
    }

    #[test]
    fn dismissal_shown_is_idempotent() {
        let mut room = joined();
        let plan = RoomStateMachine::new(&room)
            .plan(RoomEvent::DismissalShown)
            .unwrap();
        assert!(plan.is_noop());

        room.game_phase = GamePhase::Dismissed;
        room.out_message = Some("Asha is OUT! Target: 1 runs".into());
        apply(&mut room, RoomEvent::DismissalShown);
        let again = RoomStateMachine::new(&room)
            .plan(RoomEvent::DismissalShown)
            .unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn reveal_shown_only_clears_the_matching_round() {
        let mut room = joined();
        apply(
            &mut room,
            RoomEvent::RoundResolved {
                batting: choice(4),
                bowling: choice(2),
            },
        );
        let stale = RoomStateMachine::new(&room)
            .plan(RoomEvent::RevealShown { round: 0 })
            .unwrap();
        assert!(stale.is_noop());

        apply(&mut room, RoomEvent::RevealShown { round: 1 });
        assert_eq!(room.last_batting_choice, None);
        assert_eq!(room.last_bowling_choice, None);
    }

    #[test]
    fn plans_carry_version_precondition() {
        let mut room = joined();
        room.version = 7;
        let plan = RoomStateMachine::new(&room)
            .plan(RoomEvent::PlayerLeft {
                player_id: "p2".into(),
            })
            .unwrap();
        assert_eq!(plan.version, 7);
        assert_eq!(plan.patch.expected_version, Some(7));
    }

    #[test]
    fn restart_request_only_after_game_over() {
        let room = joined();
        let err = RoomStateMachine::new(&room)
            .plan(RoomEvent::RestartRequested { by: "p1".into() })
            .unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from.phase, GamePhase::Playing);
                assert_eq!(
                    invalid.event,
                    RoomEvent::RestartRequested { by: "p1".into() }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn requester_cannot_accept_own_request() {
        let mut room = finished();
        apply(&mut room, RoomEvent::RestartRequested { by: "p1".into() });

        let err = RoomStateMachine::new(&room)
            .plan(RoomEvent::RestartAccepted {
                by: "p1".into(),
                opening_batter: "p1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));

        let again = RoomStateMachine::new(&room)
            .plan(RoomEvent::RestartRequested { by: "p1".into() })
            .unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn reject_marks_rejecter_as_departed() {
        let mut room = finished();
        apply(&mut room, RoomEvent::RestartRequested { by: "p2".into() });
        apply(&mut room, RoomEvent::RestartRejected { by: "p1".into() });

        assert_eq!(room.negotiation, Negotiation::Idle);
        assert_eq!(room.player_left.as_deref(), Some("p1"));

        let err = RoomStateMachine::new(&room)
            .plan(RoomEvent::RestartRequested { by: "p2".into() })
            .unwrap_err();
        assert_eq!(err, PlanError::RoomClosed("p1".into()));
    }

    #[test]
    fn request_after_accepted_rematch_reopens_negotiation() {
        let mut room = finished();
        apply(&mut room, RoomEvent::RestartRequested { by: "p1".into() });
        apply(
            &mut room,
            RoomEvent::RestartAccepted {
                by: "p2".into(),
                opening_batter: "p1".into(),
            },
        );
        room.game_phase = GamePhase::GameOver;

        let status = apply(&mut room, RoomEvent::RestartRequested { by: "p2".into() });
        assert_eq!(
            status.negotiation,
            Negotiation::Requested { by: "p2".into() }
        );
    }

    #[test]
    fn leaving_is_member_only_and_idempotent() {
        let mut room = joined();
        let err = RoomStateMachine::new(&room)
            .plan(RoomEvent::PlayerLeft {
                player_id: "ghost".into(),
            })
            .unwrap_err();
        assert_eq!(err, PlanError::NotAMember("ghost".into()));

        apply(
            &mut room,
            RoomEvent::PlayerLeft {
                player_id: "p2".into(),
            },
        );
        assert_eq!(room.player_left.as_deref(), Some("p2"));

        let again = RoomStateMachine::new(&room)
            .plan(RoomEvent::PlayerLeft {
                player_id: "p1".into(),
            })
            .unwrap();
        assert!(again.is_noop());
    }

    #[test]
    fn join_rejected_once_room_is_full() {
        let room = joined();
        let err = RoomStateMachine::new(&room)
            .plan(RoomEvent::PlayerJoined {
                player_id: "p3".into(),
                name: "Meera".into(),
                opening_batter: "p1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn opening_batter_draw_reaches_both_players() {
        let mut rng = StdRng::seed_from_u64(42);
        let draws: Vec<_> = (0..64)
            .map(|_| pick_opening_batter("p1", "p2", &mut rng))
            .collect();
        assert!(draws.iter().any(|id| id == "p1"));
        assert!(draws.iter().any(|id| id == "p2"));
    }
}

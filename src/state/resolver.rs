//! Round resolution: turns a pair of simultaneous choices into the next room state.
//!
//! Everything here is pure. Both submission paths (the store's atomic round
//! resolution and the client-driven fallback) go through [`plan_submission`] and
//! [`resolve`], so round semantics cannot diverge between them.

use thiserror::Error;

use crate::state::room::{Ball, Choice, GamePhase, PlayerId, PlayerSlot, Room, RoomPatch};

/// Reasons a submission is refused before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitRejection {
    /// One of the players left; the match instance is over.
    #[error("room is closed: player `{0}` left")]
    RoomClosed(PlayerId),
    /// The second seat is still empty.
    #[error("waiting for an opponent to join")]
    OpponentMissing,
    /// The caller does not sit in this room.
    #[error("player `{0}` is not part of this room")]
    NotAMember(PlayerId),
    /// Choices are only accepted while playing.
    #[error("choices are not accepted while the game is {0:?}")]
    NotPlaying(GamePhase),
    /// The caller already has a pending choice for this round.
    #[error("a choice was already submitted for this round")]
    AlreadySubmitted,
    /// The submission targets a round that is not the current one.
    #[error("stale submission for round {got} (current round is {current})")]
    StaleRound {
        /// Round currently being played.
        current: u32,
        /// Round the client believed it was playing.
        got: u32,
    },
}

/// What a valid submission does to the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPlan {
    /// The peer has not moved yet: only record this player's choice.
    Record {
        /// Patch storing the pending choice.
        patch: RoomPatch,
    },
    /// The peer already moved: the round resolves now.
    Resolve {
        /// Patch produced by [`resolve`].
        patch: RoomPatch,
        /// Value played by the batter.
        batting: Choice,
        /// Value played by the bowler.
        bowling: Choice,
    },
}

impl SubmissionPlan {
    /// Patch to write for this plan.
    pub fn patch(&self) -> &RoomPatch {
        match self {
            SubmissionPlan::Record { patch } | SubmissionPlan::Resolve { patch, .. } => patch,
        }
    }

    /// Whether the plan completes the round.
    pub fn resolves(&self) -> bool {
        matches!(self, SubmissionPlan::Resolve { .. })
    }
}

/// Validate a submission against the current room and decide how it is applied.
///
/// `round_key`, when provided, must match [`Room::round`]; clients resending a
/// submission after a timeout pass it so retries cannot leak into the next round.
pub fn plan_submission(
    room: &Room,
    player_id: &str,
    choice: Choice,
    round_key: Option<u32>,
) -> Result<SubmissionPlan, SubmitRejection> {
    if let Some(left) = &room.player_left {
        return Err(SubmitRejection::RoomClosed(left.clone()));
    }
    let slot = room
        .slot_of(player_id)
        .ok_or_else(|| SubmitRejection::NotAMember(player_id.to_string()))?;
    if !room.is_full() {
        return Err(SubmitRejection::OpponentMissing);
    }
    if room.game_phase != GamePhase::Playing {
        return Err(SubmitRejection::NotPlaying(room.game_phase));
    }
    if let Some(got) = round_key.filter(|got| *got != room.round) {
        return Err(SubmitRejection::StaleRound {
            current: room.round,
            got,
        });
    }
    if room.choice(slot).is_some() {
        return Err(SubmitRejection::AlreadySubmitted);
    }

    match room.choice(slot.other()) {
        None => Ok(SubmissionPlan::Record {
            patch: RoomPatch::choice(slot, Some(choice)),
        }),
        Some(peer) => {
            let (batting, bowling) = if slot == room.batting_slot() {
                (choice, peer)
            } else {
                (peer, choice)
            };
            Ok(SubmissionPlan::Resolve {
                patch: resolve(room, batting, bowling),
                batting,
                bowling,
            })
        }
    }
}

/// Compute the authoritative outcome of a round.
pub fn resolve(room: &Room, batting: Choice, bowling: Choice) -> RoomPatch {
    let batter = room.batting_slot();
    let bowler = batter.other();
    let batter_name = room.display_name(batter);
    let bowler_name = room.display_name(bowler);
    let mut balls = room.balls(batter).to_vec();

    let mut patch = RoomPatch {
        player1_choice: Some(None),
        player2_choice: Some(None),
        last_batting_choice: Some(Some(batting)),
        last_bowling_choice: Some(Some(bowling)),
        round: Some(room.round + 1),
        ..RoomPatch::default()
    };

    if batting == bowling {
        balls.push(Ball::Wicket);
        patch.set_out(batter, true);

        match room.target {
            None => {
                // The dismissal ball scores nothing: the target builds on the runs so far.
                let target = room.runs(batter) + 1;
                patch.target = Some(Some(target));
                patch.batting_player_id = room.player_id(bowler).map(str::to_string);
                patch.game_phase = Some(GamePhase::Dismissed);
                patch.out_message = Some(Some(format!(
                    "{batter_name} is OUT! Target: {target} runs"
                )));
            }
            Some(_) => {
                patch.game_phase = Some(GamePhase::GameOver);
                patch.winner_id = Some(room.player_id(bowler).map(str::to_string));
                patch.out_message = Some(Some(format!(
                    "{batter_name} is OUT! {bowler_name} Wins!"
                )));
            }
        }
    } else {
        let runs = room.runs(batter) + u32::from(batting.value());
        balls.push(Ball::Runs(batting.value()));
        patch.set_runs(batter, runs);

        if room.target.is_some_and(|target| runs >= target) {
            patch.game_phase = Some(GamePhase::GameOver);
            patch.winner_id = Some(room.player_id(batter).map(str::to_string));
            patch.out_message = Some(Some(format!("{batter_name} Wins!")));
        }
    }

    patch.set_balls(batter, balls);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{MAX_CHOICE, MIN_CHOICE};

    fn choice(value: u8) -> Choice {
        Choice::try_from(value).unwrap()
    }

    fn full_room() -> Room {
        let mut room = Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0);
        room.player2_id = Some("p2".into());
        room.player2_name = Some("Ravi".into());
        room
    }

    fn resolved(room: &Room, batting: u8, bowling: u8) -> Room {
        let mut next = room.clone();
        next.apply(&resolve(room, choice(batting), choice(bowling)));
        next
    }

    #[test]
    fn dismissal_iff_choices_match_across_all_pairs() {
        let room = full_room();
        for batting in MIN_CHOICE..=MAX_CHOICE {
            for bowling in MIN_CHOICE..=MAX_CHOICE {
                let next = resolved(&room, batting, bowling);
                if batting == bowling {
                    assert!(next.player1_out, "{batting} vs {bowling} should be out");
                    assert_eq!(next.player1_runs, 0);
                    assert_eq!(next.player1_ball_by_ball, vec![Ball::Wicket]);
                } else {
                    assert!(!next.player1_out);
                    assert_eq!(next.player1_runs, u32::from(batting));
                    assert_eq!(next.player1_ball_by_ball, vec![Ball::Runs(batting)]);
                }
            }
        }
    }

    #[test]
    fn resolution_clears_pending_choices_and_records_pair() {
        let mut room = full_room();
        room.player1_choice = Some(choice(2));
        room.player2_choice = Some(choice(5));

        let next = resolved(&room, 2, 5);

        assert!(next.choices_cleared());
        assert_eq!(next.last_batting_choice, Some(choice(2)));
        assert_eq!(next.last_bowling_choice, Some(choice(5)));
        assert_eq!(next.round, 1);
    }

    #[test]
    fn scenario_a_runs_accumulate_without_phase_change() {
        let room = full_room();
        let next = resolved(&room, 4, 2);

        assert_eq!(next.player1_runs, 4);
        assert_eq!(next.game_phase, GamePhase::Playing);
        assert_eq!(next.batting_player_id, "p1");
        assert_eq!(next.target, None);
    }

    #[test]
    fn scenario_b_first_dismissal_sets_target_from_runs_before_the_ball() {
        let room = full_room();
        let next = resolved(&room, 3, 3);

        assert_eq!(next.target, Some(1));
        assert_eq!(next.batting_player_id, "p2");
        assert_eq!(next.game_phase, GamePhase::Dismissed);
        assert_eq!(
            next.out_message.as_deref(),
            Some("Asha is OUT! Target: 1 runs")
        );
    }

    #[test]
    fn first_dismissal_after_scoring_targets_runs_plus_one() {
        let mut room = full_room();
        room.player1_runs = 17;
        let next = resolved(&room, 6, 6);
        assert_eq!(next.target, Some(18));
        assert_eq!(next.player1_runs, 17);
    }

    #[test]
    fn scenario_c_target_reached_ends_the_game() {
        let mut room = full_room();
        room.batting_player_id = "p2".into();
        room.player1_out = true;
        room.target = Some(10);
        room.player2_runs = 9;

        let next = resolved(&room, 6, 1);

        assert_eq!(next.player2_runs, 15);
        assert_eq!(next.game_phase, GamePhase::GameOver);
        assert_eq!(next.winner_id.as_deref(), Some("p2"));
        assert_eq!(next.out_message.as_deref(), Some("Ravi Wins!"));
    }

    #[test]
    fn second_dismissal_names_the_bowler_as_winner() {
        let mut room = full_room();
        room.batting_player_id = "p2".into();
        room.target = Some(30);
        room.player2_runs = 12;

        let next = resolved(&room, 2, 2);

        assert_eq!(next.game_phase, GamePhase::GameOver);
        assert_eq!(next.winner_id.as_deref(), Some("p1"));
        assert_eq!(next.target, Some(30));
        assert_eq!(
            next.out_message.as_deref(),
            Some("Ravi is OUT! Asha Wins!")
        );
    }

    #[test]
    fn first_mover_only_records_choice() {
        let room = full_room();
        let plan = plan_submission(&room, "p2", choice(5), None).unwrap();
        assert!(!plan.resolves());

        let mut next = room.clone();
        next.apply(plan.patch());
        assert_eq!(next.player2_choice, Some(choice(5)));
        assert_eq!(next.player1_choice, None);
    }

    #[test]
    fn second_mover_resolves_with_roles_from_batting_player() {
        let mut room = full_room();
        room.batting_player_id = "p2".into();
        room.player2_choice = Some(choice(4));

        let plan = plan_submission(&room, "p1", choice(1), None).unwrap();
        match plan {
            SubmissionPlan::Resolve {
                batting, bowling, ..
            } => {
                assert_eq!(batting, choice(4));
                assert_eq!(bowling, choice(1));
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn invalid_submissions_are_rejected() {
        let lonely = Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0);
        assert_eq!(
            plan_submission(&lonely, "p1", choice(1), None),
            Err(SubmitRejection::OpponentMissing)
        );

        let mut room = full_room();
        assert_eq!(
            plan_submission(&room, "intruder", choice(1), None),
            Err(SubmitRejection::NotAMember("intruder".into()))
        );
        assert_eq!(
            plan_submission(&room, "p1", choice(1), Some(3)),
            Err(SubmitRejection::StaleRound { current: 0, got: 3 })
        );

        room.player1_choice = Some(choice(2));
        assert_eq!(
            plan_submission(&room, "p1", choice(1), None),
            Err(SubmitRejection::AlreadySubmitted)
        );

        room.game_phase = GamePhase::Dismissed;
        assert_eq!(
            plan_submission(&room, "p2", choice(1), None),
            Err(SubmitRejection::NotPlaying(GamePhase::Dismissed))
        );

        room.player_left = Some("p2".into());
        assert_eq!(
            plan_submission(&room, "p1", choice(1), None),
            Err(SubmitRejection::RoomClosed("p2".into()))
        );
    }
}

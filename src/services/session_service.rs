//! Drives one [`SessionReconciler`] per connected player.
//!
//! A session subscribes to the room's change feed, turns every delivered
//! record into derived events and fires the display timers: once a dismissal
//! message or a choice reveal has been on screen long enough, the session asks
//! the room actor to move on. Both players run the same timers; the resulting
//! writes are idempotent so the second one finds nothing to do.

use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::{
    dto::room::SubmitChoiceRequest,
    error::ServiceError,
    services::room_service,
    state::{
        SharedState,
        reconciler::{DerivedEvent, SessionReconciler},
        room::{PlayerId, Room},
    },
};

/// Commands a connected player can send besides choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    RequestRestart,
    AcceptRestart,
    RejectRestart,
    Leave,
}

/// A freshly opened session together with its feed subscription.
pub struct OpenedSession {
    /// Session driver for the player.
    pub session: Session,
    /// Room records published after subscription.
    pub receiver: broadcast::Receiver<Room>,
    /// Events derived from the snapshot read at subscription time.
    pub events: Vec<DerivedEvent>,
}

/// Result of a submission made through a session.
#[derive(Debug)]
pub struct SessionSubmit {
    /// Local input gate changes caused by the submission.
    pub events: Vec<DerivedEvent>,
    /// Why the submission failed, if it did.
    pub error: Option<ServiceError>,
}

/// Server-side stand-in for one player's client.
pub struct Session {
    state: SharedState,
    room_code: String,
    reconciler: SessionReconciler,
}

/// Subscribe `player_id` to `raw_code` and project the current snapshot.
///
/// The feed is subscribed before the snapshot is read so no write can fall
/// between the two; a record delivered twice is dropped by the reconciler.
pub async fn open_session(
    state: &SharedState,
    raw_code: &str,
    player_id: PlayerId,
) -> Result<OpenedSession, ServiceError> {
    let room_code = room_service::normalize_room_code(raw_code, 1)?;
    let receiver = state.feed().subscribe(&room_code);
    let room = room_service::load_room(state, &room_code).await?;

    if room.slot_of(&player_id).is_none() {
        return Err(ServiceError::Unauthorized(format!(
            "player `{player_id}` is not part of room `{room_code}`"
        )));
    }

    let mut session = Session {
        state: state.clone(),
        room_code,
        reconciler: SessionReconciler::new(player_id),
    };
    let events = session.apply(&room);
    info!(room = %session.room_code, player = %session.player_id(), "session opened");

    Ok(OpenedSession {
        session,
        receiver,
        events,
    })
}

impl Session {
    /// Normalized code of the room.
    pub fn room_code(&self) -> &str {
        &self.room_code
    }

    /// Player this session acts for.
    pub fn player_id(&self) -> &str {
        self.reconciler.player_id()
    }

    /// Whether this player may submit a choice right now.
    pub fn input_enabled(&self) -> bool {
        self.reconciler.input_enabled()
    }

    /// Project `room` and start the display timers it calls for.
    pub fn apply(&mut self, room: &Room) -> Vec<DerivedEvent> {
        let events = self.reconciler.on_notification(room);
        for event in &events {
            match event {
                DerivedEvent::DismissalMessage { .. } => self.schedule_dismissal(),
                DerivedEvent::ChoiceReveal { round, .. } => self.schedule_reveal(*round),
                _ => {}
            }
        }
        events
    }

    /// Handle one delivery from the change feed. `None` means the feed closed.
    ///
    /// A lagging subscriber skipped records; the current one is read back from
    /// the store instead.
    pub async fn on_feed(&mut self, delivery: Result<Room, RecvError>) -> Option<Vec<DerivedEvent>> {
        match delivery {
            Ok(room) => Some(self.apply(&room)),
            Err(RecvError::Lagged(skipped)) => {
                debug!(room = %self.room_code, skipped, "session lagged behind change feed");
                match room_service::load_room(&self.state, &self.room_code).await {
                    Ok(room) => Some(self.apply(&room)),
                    Err(err) => {
                        warn!(room = %self.room_code, error = %err, "failed to refresh lagged session");
                        Some(Vec::new())
                    }
                }
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Submit a choice. Input is closed first and reopened only when the store
    /// could not be reached; a rejected submission keeps it closed until the
    /// feed shows the round cleared.
    ///
    /// Without an explicit round the last applied snapshot's round is sent, so
    /// a resubmission after that round resolved is rejected as stale.
    pub async fn submit(&mut self, choice: u8, round: Option<u32>) -> SessionSubmit {
        let mut events: Vec<DerivedEvent> = self.reconciler.mark_submitted().into_iter().collect();
        let round = round.or_else(|| self.reconciler.current().map(|room| room.round));
        let request = SubmitChoiceRequest {
            player_id: self.player_id().to_string(),
            choice,
            round,
        };

        match room_service::submit_choice(&self.state, &self.room_code, request).await {
            Ok(_) => SessionSubmit {
                events,
                error: None,
            },
            Err(err) => {
                if err.is_retryable() {
                    events.extend(self.reconciler.submission_failed());
                }
                SessionSubmit {
                    events,
                    error: Some(err),
                }
            }
        }
    }

    /// Forward a restart or leave command. The outcome arrives through the feed.
    pub async fn command(&self, command: SessionCommand) -> Result<(), ServiceError> {
        let player_id = self.player_id().to_string();
        let state = &self.state;
        let code = self.room_code.as_str();
        match command {
            SessionCommand::RequestRestart => room_service::request_restart(state, code, player_id).await?,
            SessionCommand::AcceptRestart => room_service::accept_restart(state, code, player_id).await?,
            SessionCommand::RejectRestart => room_service::reject_restart(state, code, player_id).await?,
            SessionCommand::Leave => room_service::leave_room(state, code, player_id).await?,
        };
        Ok(())
    }

    fn schedule_dismissal(&self) {
        let state = self.state.clone();
        let code = self.room_code.clone();
        let window = state.config().dismissal_window;
        spawn_timer(window, async move {
            if let Err(err) = room_service::complete_dismissal(&state, &code).await {
                debug!(room = %code, error = %err, "dismissal timer write failed");
            }
        });
    }

    fn schedule_reveal(&self, round: u32) {
        let state = self.state.clone();
        let code = self.room_code.clone();
        let window = state.config().reveal_window;
        spawn_timer(window, async move {
            if let Err(err) = room_service::complete_reveal(&state, &code, round).await {
                debug!(room = %code, round, error = %err, "reveal timer write failed");
            }
        });
    }
}

fn spawn_timer<F>(window: Duration, task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        task.await;
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        dto::room::{CreateRoomRequest, JoinRoomRequest},
        state::{AppState, room::GamePhase},
    };

    async fn joined_room(config: AppConfig) -> (SharedState, String) {
        let state = AppState::new(config);
        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;
        let created = room_service::create_room(
            &state,
            CreateRoomRequest {
                player_name: "Asha".into(),
                player_id: Some("p1".into()),
            },
        )
        .await
        .unwrap();
        room_service::join_room(
            &state,
            &created.room_code,
            JoinRoomRequest {
                player_name: "Ravi".into(),
                player_id: Some("p2".into()),
            },
        )
        .await
        .unwrap();
        (state, created.room_code)
    }

    fn fast() -> AppConfig {
        AppConfig {
            reveal_window: Duration::from_millis(10),
            dismissal_window: Duration::from_millis(10),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn strangers_cannot_open_a_session() {
        let (state, code) = joined_room(fast()).await;
        let err = open_session(&state, &code, "p9".into()).await.err().unwrap();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn first_snapshot_enables_input() {
        let (state, code) = joined_room(fast()).await;
        let opened = open_session(&state, &code, "p1".into()).await.unwrap();
        assert!(
            opened
                .events
                .contains(&DerivedEvent::InputEnabled { enabled: true })
        );
    }

    #[tokio::test]
    async fn rejected_submission_keeps_input_closed() {
        let (state, code) = joined_room(fast()).await;
        let mut opened = open_session(&state, &code, "p1".into()).await.unwrap();

        let first = opened.session.submit(3, None).await;
        assert!(first.error.is_none());
        assert_eq!(first.events, vec![DerivedEvent::InputEnabled { enabled: false }]);

        // The stored choice stands, so the gate stays shut.
        let again = opened.session.submit(4, None).await;
        assert!(matches!(again.error, Some(ServiceError::Conflict(_))));
        assert!(again.events.is_empty());
        assert!(!opened.session.input_enabled());

        let room = room_service::load_room(&state, &code).await.unwrap();
        assert_eq!(room.player1_choice.map(|choice| choice.value()), Some(3));
    }

    #[tokio::test]
    async fn unreachable_store_reopens_input() {
        let (state, code) = joined_room(fast()).await;
        let mut opened = open_session(&state, &code, "p1".into()).await.unwrap();
        state.clear_room_store().await;

        let submitted = opened.session.submit(3, None).await;
        assert!(matches!(submitted.error, Some(ServiceError::Degraded)));
        assert_eq!(
            submitted.events,
            vec![
                DerivedEvent::InputEnabled { enabled: false },
                DerivedEvent::InputEnabled { enabled: true },
            ]
        );
        assert!(opened.session.input_enabled());
    }

    #[tokio::test]
    async fn reveal_timer_clears_last_choices() {
        let (state, code) = joined_room(fast()).await;
        let mut opened = open_session(&state, &code, "p1".into()).await.unwrap();

        let room = room_service::load_room(&state, &code).await.unwrap();
        let batter = room.batting_player_id.clone();
        let bowler = if batter == "p1" { "p2" } else { "p1" };
        for (player, choice) in [(batter.as_str(), 2u8), (bowler, 5u8)] {
            room_service::submit_choice(
                &state,
                &code,
                SubmitChoiceRequest {
                    player_id: player.into(),
                    choice,
                    round: None,
                },
            )
            .await
            .unwrap();
        }

        let mut revealed = false;
        while !revealed {
            let delivery = opened.receiver.recv().await;
            let events = opened.session.on_feed(delivery).await.unwrap();
            revealed = events
                .iter()
                .any(|event| matches!(event, DerivedEvent::ChoiceReveal { round: 1, .. }));
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        let room = room_service::load_room(&state, &code).await.unwrap();
        assert_eq!(room.last_batting_choice, None);
        assert_eq!(room.game_phase, GamePhase::Playing);
        assert_eq!(room.round, 1);
    }
}

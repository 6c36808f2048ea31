//! Per-room actor: the only task that writes a given room in this process.
//!
//! Commands for a room are funnelled through one `mpsc` inbox and handled in
//! order, so submissions, joins and phase transitions of the same room never
//! interleave. Actors are spawned on demand and stop after an idle period or
//! when their room turns out not to exist.

use std::time::Duration;

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{room_store::RoundRequest, storage::StorageError},
    error::ServiceError,
    services::submission::{self, SubmitOutcome},
    state::{
        SharedState,
        room::{PlayerId, Room},
        state_machine::{RoomEvent, RoomStateMachine, pick_opening_batter},
    },
};

const INBOX_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

/// Phase transitions a room actor can perform on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRequest {
    /// Ask the opponent for a rematch.
    RequestRestart { by: PlayerId },
    /// Accept the opponent's pending request.
    AcceptRestart { by: PlayerId },
    /// Decline the opponent's pending request.
    RejectRestart { by: PlayerId },
    /// Leave the room for good.
    Leave { player_id: PlayerId },
    /// The dismissal message was displayed.
    DismissalShown,
    /// The reveal of `round` was displayed.
    RevealShown { round: u32 },
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Room as stored after the join.
    pub room: Room,
    /// The caller already sat in the room; nothing was written.
    pub rejoined: bool,
}

/// Messages understood by a room actor.
pub enum RoomCommand {
    /// Take the free seat or rejoin.
    Join {
        player_id: PlayerId,
        name: String,
        respond: Reply<JoinOutcome>,
    },
    /// Record or resolve a choice.
    Submit {
        request: RoundRequest,
        respond: Reply<SubmitOutcome>,
    },
    /// Apply a phase transition.
    Transition {
        request: TransitionRequest,
        respond: Reply<Room>,
    },
}

/// Cloneable address of a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    actor_id: Uuid,
    sender: mpsc::Sender<RoomCommand>,
    stopped: watch::Receiver<bool>,
}

impl RoomHandle {
    /// Identity of the actor behind this handle.
    pub fn actor_id(&self) -> Uuid {
        self.actor_id
    }
}

/// Handle of the actor owning `room_code`, spawning one if none is running.
pub fn handle_for(state: &SharedState, room_code: &str) -> RoomHandle {
    state
        .rooms()
        .entry(room_code.to_string())
        .or_insert_with(|| spawn(state.clone(), room_code.to_string()))
        .clone()
}

fn forget(state: &SharedState, room_code: &str, actor_id: Uuid) {
    state
        .rooms()
        .remove_if(room_code, |_, handle| handle.actor_id == actor_id);
}

fn spawn(state: SharedState, room_code: String) -> RoomHandle {
    let (sender, inbox) = mpsc::channel(INBOX_CAPACITY);
    let (stopped_tx, stopped) = watch::channel(false);
    let actor_id = Uuid::new_v4();
    let actor = RoomActor {
        idle_timeout: state.config().room_idle_timeout,
        state,
        room_code,
        actor_id,
        inbox,
        stopped: stopped_tx,
        room_missing: false,
    };
    tokio::spawn(actor.run());
    RoomHandle {
        actor_id,
        sender,
        stopped,
    }
}

/// Send a command to the room's actor and wait for its reply.
///
/// A handle whose actor is shutting down is waited out, dropped from the
/// registry, and the command is retried once against a fresh actor.
pub async fn dispatch<T, F>(state: &SharedState, room_code: &str, build: F) -> Result<T, ServiceError>
where
    F: Fn(Reply<T>) -> RoomCommand,
{
    let limit = state.config().command_timeout;

    for _ in 0..2 {
        let handle = handle_for(state, room_code);
        let (respond, reply) = oneshot::channel();

        if handle.sender.send(build(respond)).await.is_err() {
            debug!(room = room_code, actor = %handle.actor_id, "room actor stopping; respawning");
            // The old actor may still be draining its inbox.
            let mut stopped = handle.stopped.clone();
            let _ = stopped.wait_for(|stopped| *stopped).await;
            forget(state, room_code, handle.actor_id);
            continue;
        }

        return match timeout(limit, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => {
                warn!(room = room_code, "room actor did not answer in time");
                Err(ServiceError::Timeout)
            }
        };
    }

    Err(ServiceError::Timeout)
}

struct RoomActor {
    state: SharedState,
    room_code: String,
    actor_id: Uuid,
    inbox: mpsc::Receiver<RoomCommand>,
    stopped: watch::Sender<bool>,
    idle_timeout: Duration,
    room_missing: bool,
}

impl RoomActor {
    async fn run(mut self) {
        debug!(room = %self.room_code, actor = %self.actor_id, "room actor started");

        loop {
            match timeout(self.idle_timeout, self.inbox.recv()).await {
                Ok(Some(command)) => {
                    self.handle(command).await;
                    if self.room_missing {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    debug!(room = %self.room_code, "room actor idle; stopping");
                    break;
                }
            }
        }

        // Refuse new commands and finish what was queued before a successor may start.
        self.inbox.close();
        while let Some(command) = self.inbox.recv().await {
            self.handle(command).await;
        }
        forget(&self.state, &self.room_code, self.actor_id);
        self.stopped.send_replace(true);
        debug!(room = %self.room_code, actor = %self.actor_id, "room actor stopped");
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                player_id,
                name,
                respond,
            } => {
                let result = self.join(player_id, name).await;
                let _ = respond.send(result);
            }
            RoomCommand::Submit { request, respond } => {
                let result = self.submit(request).await;
                let _ = respond.send(result);
            }
            RoomCommand::Transition { request, respond } => {
                let result = self.transition(request).await;
                let _ = respond.send(result);
            }
        }
    }

    async fn load(&mut self) -> Result<Room, ServiceError> {
        let store = self.state.require_room_store().await?;
        match store.get_room(&self.room_code).await? {
            Some(room) => Ok(room),
            None => {
                self.room_missing = true;
                Err(ServiceError::NotFound("Room not found".into()))
            }
        }
    }

    async fn join(&mut self, player_id: PlayerId, name: String) -> Result<JoinOutcome, ServiceError> {
        let room = self.load().await?;

        if room.slot_of(&player_id).is_some() {
            debug!(room = %self.room_code, player = %player_id, "player rejoined");
            return Ok(JoinOutcome {
                room,
                rejoined: true,
            });
        }
        if room.is_full() {
            return Err(ServiceError::Conflict("Room is full".into()));
        }

        let opening_batter = pick_opening_batter(&room.player1_id, &player_id, &mut rand::rng());
        let plan = RoomStateMachine::new(&room).plan(RoomEvent::PlayerJoined {
            player_id: player_id.clone(),
            name,
            opening_batter,
        })?;

        let store = self.state.require_room_store().await?;
        let room = store.update_room(&self.room_code, plan.patch).await?;
        info!(
            room = %self.room_code,
            player = %player_id,
            batting = %room.batting_player_id,
            "second player joined"
        );
        Ok(JoinOutcome {
            room,
            rejoined: false,
        })
    }

    async fn submit(&mut self, request: RoundRequest) -> Result<SubmitOutcome, ServiceError> {
        let store = self.state.require_room_store().await?;
        let player_id = request.player_id.clone();
        match submission::submit(store.as_ref(), &self.room_code, request).await {
            Ok(outcome) => {
                info!(
                    room = %self.room_code,
                    player = %player_id,
                    status = ?outcome.status,
                    path = ?outcome.path,
                    round = outcome.room.round,
                    "choice submitted"
                );
                Ok(outcome)
            }
            Err(StorageError::RoomNotFound { .. }) => {
                self.room_missing = true;
                Err(ServiceError::NotFound("Room not found".into()))
            }
            Err(err) => {
                warn!(room = %self.room_code, player = %player_id, error = %err, "submission failed");
                Err(err.into())
            }
        }
    }

    async fn transition(&mut self, request: TransitionRequest) -> Result<Room, ServiceError> {
        let mut retried = false;
        loop {
            let room = self.load().await?;
            let event = self.event_for(&room, &request);
            let plan = RoomStateMachine::new(&room).plan(event)?;
            if plan.is_noop() {
                return Ok(room);
            }

            let store = self.state.require_room_store().await?;
            match store.update_room(&self.room_code, plan.patch).await {
                Ok(next) => {
                    debug!(
                        room = %self.room_code,
                        from = ?plan.from,
                        to = ?plan.to,
                        version = next.version,
                        "room transition applied"
                    );
                    return Ok(next);
                }
                Err(StorageError::VersionConflict { .. }) if !retried => {
                    retried = true;
                    debug!(room = %self.room_code, "room changed underneath transition; replanning");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn event_for(&self, room: &Room, request: &TransitionRequest) -> RoomEvent {
        match request {
            TransitionRequest::RequestRestart { by } => RoomEvent::RestartRequested { by: by.clone() },
            TransitionRequest::AcceptRestart { by } => {
                let second = room.player2_id.as_deref().unwrap_or(&room.player1_id);
                RoomEvent::RestartAccepted {
                    by: by.clone(),
                    opening_batter: pick_opening_batter(&room.player1_id, second, &mut rand::rng()),
                }
            }
            TransitionRequest::RejectRestart { by } => RoomEvent::RestartRejected { by: by.clone() },
            TransitionRequest::Leave { player_id } => RoomEvent::PlayerLeft {
                player_id: player_id.clone(),
            },
            TransitionRequest::DismissalShown => RoomEvent::DismissalShown,
            TransitionRequest::RevealShown { round } => RoomEvent::RevealShown { round: *round },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        state::AppState,
    };

    async fn state_with_room(config: AppConfig) -> SharedState {
        let state = AppState::new(config);
        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;
        let store = state.require_room_store().await.unwrap();
        store
            .create_room(Room::new("ROOM42".into(), "p1".into(), "Asha".into(), 0))
            .await
            .unwrap();
        state
    }

    async fn join(state: &SharedState, player_id: &str) -> Result<JoinOutcome, ServiceError> {
        dispatch(state, "ROOM42", |respond| RoomCommand::Join {
            player_id: player_id.into(),
            name: "Ravi".into(),
            respond,
        })
        .await
    }

    #[tokio::test]
    async fn join_fills_seat_then_rejects_third_player() {
        let state = state_with_room(AppConfig::default()).await;

        let joined = join(&state, "p2").await.unwrap();
        assert!(!joined.rejoined);
        assert_eq!(joined.room.player2_id.as_deref(), Some("p2"));
        assert!(["p1", "p2"].contains(&joined.room.batting_player_id.as_str()));

        let again = join(&state, "p2").await.unwrap();
        assert!(again.rejoined);
        assert_eq!(again.room.version, joined.room.version);

        let err = join(&state, "p3").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
        let room = state
            .require_room_store()
            .await
            .unwrap()
            .get_room("ROOM42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(room.version, joined.room.version);
    }

    #[tokio::test]
    async fn unknown_room_stops_its_actor() {
        let state = state_with_room(AppConfig::default()).await;
        let err = dispatch(&state, "NOPE00", |respond| RoomCommand::Join {
            player_id: "p9".into(),
            name: "Ghost".into(),
            respond,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(state.rooms().get("NOPE00").is_none());
    }

    #[tokio::test]
    async fn idle_actor_is_replaced_on_next_command() {
        let config = AppConfig {
            room_idle_timeout: Duration::from_millis(10),
            ..AppConfig::default()
        };
        let state = state_with_room(config).await;

        join(&state, "p2").await.unwrap();
        let first = state.rooms().get("ROOM42").map(|h| h.actor_id());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(state.rooms().get("ROOM42").is_none());

        join(&state, "p2").await.unwrap();
        let second = state.rooms().get("ROOM42").map(|h| h.actor_id());
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn successor_waits_for_a_draining_actor() {
        let state = state_with_room(AppConfig::default()).await;

        // A registered actor that has closed its inbox but is still draining.
        let (sender, mut inbox) = mpsc::channel(INBOX_CAPACITY);
        let (stopped_tx, stopped) = watch::channel(false);
        let draining = Uuid::new_v4();
        inbox.close();
        state.rooms().insert(
            "ROOM42".into(),
            RoomHandle {
                actor_id: draining,
                sender,
                stopped,
            },
        );

        let pending = tokio::spawn({
            let state = state.clone();
            async move { join(&state, "p2").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending.is_finished());
        assert_eq!(
            state.rooms().get("ROOM42").map(|h| h.actor_id()),
            Some(draining)
        );

        stopped_tx.send_replace(true);
        drop(inbox);
        let joined = pending.await.unwrap().unwrap();
        assert_eq!(joined.room.player2_id.as_deref(), Some("p2"));
        assert_ne!(
            state.rooms().get("ROOM42").map(|h| h.actor_id()),
            Some(draining)
        );
    }

    #[tokio::test]
    async fn noop_transitions_do_not_write() {
        let state = state_with_room(AppConfig::default()).await;
        join(&state, "p2").await.unwrap();
        let before = state
            .require_room_store()
            .await
            .unwrap()
            .get_room("ROOM42")
            .await
            .unwrap()
            .unwrap();

        let room = dispatch(&state, "ROOM42", |respond| RoomCommand::Transition {
            request: TransitionRequest::DismissalShown,
            respond,
        })
        .await
        .unwrap();
        assert_eq!(room.version, before.version);
    }
}

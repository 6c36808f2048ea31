use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{PlayerInboundMessage, PlayerOutboundMessage},
    error::ServiceError,
    services::session_service::{self, OpenedSession, SessionCommand},
    state::{SharedState, reconciler::DerivedEvent, room::Room},
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// The writer task is gone; the connection should be torn down.
#[derive(Debug, Error)]
#[error("connection closed")]
struct ConnectionClosed;

enum Step {
    Frame(Option<Result<Message, axum::Error>>),
    Feed(Result<Room, RecvError>),
}

/// Handle the full lifecycle of a player WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!("websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let (room_code, player_id) = match PlayerInboundMessage::from_json_str(&initial_message) {
        Ok(PlayerInboundMessage::Identification {
            room_code,
            player_id,
        }) => (room_code, player_id),
        Ok(_) => {
            warn!("first message was not identification");
            send_error(&outbound_tx, "first frame must identify the player", false);
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Err(err) => {
            warn!(error = %err, "failed to parse or validate identification");
            send_error(&outbound_tx, &err.to_string(), false);
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let OpenedSession {
        mut session,
        receiver: mut feed,
        events,
    } = match session_service::open_session(&state, &room_code, player_id).await {
        Ok(opened) => opened,
        Err(err) => {
            warn!(room = %room_code, error = %err, "websocket session refused");
            send_service_error(&outbound_tx, &err);
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let room_code = session.room_code().to_string();
    let player_id = session.player_id().to_string();
    info!(room = %room_code, player = %player_id, "player connected");

    let identified = PlayerOutboundMessage::Identified {
        room_code: room_code.clone(),
        player_id: player_id.clone(),
    };
    if send_message(&outbound_tx, &identified).is_err() || send_events(&outbound_tx, events).is_err() {
        finalize(writer_task, outbound_tx).await;
        return;
    }

    loop {
        let step = tokio::select! {
            frame = receiver.next() => Step::Frame(frame),
            delivery = feed.recv() => Step::Feed(delivery),
        };

        let message = match step {
            Step::Feed(delivery) => {
                let Some(events) = session.on_feed(delivery).await else {
                    break;
                };
                if send_events(&outbound_tx, events).is_err() {
                    break;
                }
                continue;
            }
            Step::Frame(None) => break,
            Step::Frame(Some(Err(err))) => {
                warn!(room = %room_code, player = %player_id, error = %err, "websocket error");
                break;
            }
            Step::Frame(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                debug!(room = %room_code, player = %player_id, payload = %text, "received player frame");
                let inbound = match PlayerInboundMessage::from_json_str(&text) {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        warn!(player = %player_id, error = %err, "failed to parse or validate player frame");
                        send_error(&outbound_tx, &err.to_string(), false);
                        continue;
                    }
                };

                let command = match inbound {
                    PlayerInboundMessage::Choice { choice, round } => {
                        let submitted = session.submit(choice, round).await;
                        if send_events(&outbound_tx, submitted.events).is_err() {
                            break;
                        }
                        if let Some(err) = submitted.error {
                            send_service_error(&outbound_tx, &err);
                        }
                        continue;
                    }
                    PlayerInboundMessage::RestartRequest => SessionCommand::RequestRestart,
                    PlayerInboundMessage::RestartAccept => SessionCommand::AcceptRestart,
                    PlayerInboundMessage::RestartReject => SessionCommand::RejectRestart,
                    PlayerInboundMessage::Leave => SessionCommand::Leave,
                    PlayerInboundMessage::Identification { .. } => {
                        warn!(player = %player_id, "ignoring duplicate identification message");
                        continue;
                    }
                };

                if let Err(err) = session.command(command).await {
                    warn!(room = %room_code, player = %player_id, ?command, error = %err, "player command failed");
                    send_service_error(&outbound_tx, &err);
                }
            }
            Message::Ping(payload) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Message::Close(frame) => {
                info!(room = %room_code, player = %player_id, "player closed connection");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Message::Binary(_) | Message::Pong(_) => {}
        }
    }

    info!(room = %room_code, player = %player_id, "player disconnected");
    finalize(writer_task, outbound_tx).await;
}

/// Serialize a payload and push it onto the writer channel.
///
/// Serialization failures are logged and swallowed; `Err` means the writer is gone.
fn send_message<T>(tx: &mpsc::UnboundedSender<Message>, value: &T) -> Result<(), ConnectionClosed>
where
    T: serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into())).map_err(|_| ConnectionClosed)
}

fn send_events(tx: &mpsc::UnboundedSender<Message>, events: Vec<DerivedEvent>) -> Result<(), ConnectionClosed> {
    for event in events {
        send_message(tx, &PlayerOutboundMessage::Event { event })?;
    }
    Ok(())
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, message: &str, retryable: bool) {
    let _ = send_message(
        tx,
        &PlayerOutboundMessage::Error {
            message: message.to_string(),
            retryable,
        },
    );
}

fn send_service_error(tx: &mpsc::UnboundedSender<Message>, err: &ServiceError) {
    send_error(tx, &err.to_string(), err.is_retryable());
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

use std::{convert::Infallible, time::Duration};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    services::session_service::OpenedSession,
    state::{SharedState, reconciler::DerivedEvent, room::Room},
};

enum Step {
    Feed(Result<Room, RecvError>),
    DegradedChanged,
    Stopped,
}

/// Stream a player's derived events, starting with a handshake and the
/// events of the snapshot read when the session opened.
pub fn session_stream(
    state: SharedState,
    opened: OpenedSession,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let OpenedSession {
        mut session,
        mut receiver,
        events,
    } = opened;
    let mut degraded = state.degraded_watcher();

    stream! {
        let handshake = Handshake {
            room_code: session.room_code().to_string(),
            player_id: session.player_id().to_string(),
            degraded: state.is_degraded(),
        };
        if let Some(event) = encode("handshake", &handshake) {
            yield Ok(event);
        }
        for derived in &events {
            if let Some(event) = encode_derived(derived) {
                yield Ok(event);
            }
        }

        loop {
            let step = tokio::select! {
                delivery = receiver.recv() => Step::Feed(delivery),
                changed = degraded.changed() => match changed {
                    Ok(()) => Step::DegradedChanged,
                    Err(_) => Step::Stopped,
                },
            };

            match step {
                Step::Feed(delivery) => {
                    let Some(events) = session.on_feed(delivery).await else {
                        break;
                    };
                    for derived in &events {
                        if let Some(event) = encode_derived(derived) {
                            yield Ok(event);
                        }
                    }
                }
                Step::DegradedChanged => {
                    let value = *degraded.borrow_and_update();
                    if let Some(event) = encode("system_status", &SystemStatus { degraded: value }) {
                        yield Ok(event);
                    }
                }
                Step::Stopped => break,
            }
        }

        info!(room = %session.room_code(), player = %session.player_id(), "player SSE stream closed");
    }
}

/// Wrap an event stream into an SSE response with periodic keep-alives.
pub fn to_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn encode_derived(derived: &DerivedEvent) -> Option<Event> {
    encode(derived.kind(), derived)
}

fn encode<T: serde::Serialize>(name: &str, payload: &T) -> Option<Event> {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(payload) => Some(into_event(payload)),
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialise SSE payload");
            None
        }
    }
}

fn into_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{http::header, response::IntoResponse};
    use futures::StreamExt;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::room_store::memory::MemoryRoomStore,
        dto::room::CreateRoomRequest,
        services::{room_service, session_service},
        state::AppState,
    };

    async fn state_with_room() -> (SharedState, String) {
        let state = AppState::new(AppConfig::default());
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
        (state, created.room_code)
    }

    #[tokio::test]
    async fn player_stream_runs_on_a_spawned_task() {
        let (state, code) = state_with_room().await;
        let opened = session_service::open_session(&state, &code, "p1".into())
            .await
            .unwrap();

        let mut stream = Box::pin(session_stream(state.clone(), opened));
        let first = tokio::spawn(async move { stream.next().await })
            .await
            .unwrap();
        assert!(matches!(first, Some(Ok(_))));
    }

    #[tokio::test]
    async fn player_stream_is_served_as_event_stream() {
        let (state, code) = state_with_room().await;
        let opened = session_service::open_session(&state, &code, "p1".into())
            .await
            .unwrap();

        let response = to_sse_response(session_stream(state.clone(), opened)).into_response();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    }
}

use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Hand Cricket Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::get_room,
        crate::routes::rooms::join_room,
        crate::routes::rooms::submit_choice,
        crate::routes::rooms::request_restart,
        crate::routes::rooms::accept_restart,
        crate::routes::rooms::reject_restart,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::complete_dismissal,
        crate::routes::rooms::complete_reveal,
        crate::routes::rooms::room_events,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::PlayerRequest,
            crate::dto::room::SubmitChoiceRequest,
            crate::dto::room::RevealCompleteRequest,
            crate::dto::room::RoomView,
            crate::dto::room::RoomJoinedResponse,
            crate::dto::room::SubmitChoiceResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::SystemStatus,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
            crate::state::reconciler::DerivedEvent,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room lifecycle, rounds, rematches and player event streams"),
        (name = "players", description = "WebSocket sessions for players"),
    )
)]
pub struct ApiDoc;

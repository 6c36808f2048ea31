/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-room actors serializing every write to a room.
pub mod room_actor;
/// Room creation, joining and the commands routed to room actors.
pub mod room_service;
/// Per-player sessions projecting the change feed into derived events.
pub mod session_service;
/// Server-Sent Events streaming of player sessions.
pub mod sse_service;
/// Storage connection supervisor with backoff and degraded mode.
pub mod storage_supervisor;
/// Atomic and fallback submission paths.
pub mod submission;
/// WebSocket connection and message handling service.
pub mod websocket_service;

/// Best-effort delivery of a session's final removal messages.
pub mod beacon;
/// Change notifications published on the relay's push stream.
pub mod change_events;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Presence, readiness and public configuration for relay clients.
pub mod lobby_service;
/// PostgREST-compatible table access.
pub mod record_service;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Record store connection supervisor with backoff.
pub mod storage_supervisor;
/// Push or poll synchronization of a lobby session.
pub mod sync;

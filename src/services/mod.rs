/// Room chat hooks.
pub mod chat;
/// OpenAPI documentation generation.
pub mod documentation;
/// Outbound message gateway and its WebSocket implementation.
pub mod gateway;
/// Health check service.
pub mod health_service;
/// Public service for read-only room information.
pub mod public_service;
/// Room directory: creation, membership and teardown.
pub mod room_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;

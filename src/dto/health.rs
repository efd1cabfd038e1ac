use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Number of live rooms.
    pub rooms: usize,
    /// Number of open WebSocket connections.
    pub connections: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(rooms: usize, connections: usize) -> Self {
        Self {
            status: "ok".to_string(),
            rooms,
            connections,
        }
    }
}

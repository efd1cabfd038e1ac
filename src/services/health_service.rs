use tracing::debug;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness along with the current load of the server.
pub fn health_status(state: &SharedState) -> HealthResponse {
    let rooms = state.rooms().room_count();
    let connections = state.gateway().connection_count();
    debug!(rooms, connections, "health check");
    HealthResponse::ok(rooms, connections)
}

use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the quiz room backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::public::get_room,
        crate::routes::public::get_history,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::game::RoomSummary,
            crate::dto::game::HistoryEntry,
            crate::dto::game::User,
            crate::dto::game::JoinRequest,
            crate::dto::game::JoinedGame,
            crate::dto::game::GameStatePayload,
            crate::dto::game::UserStat,
            crate::dto::game::HistogramData,
            crate::dto::game::QrlAnswer,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "public", description = "Read-only room and history endpoints"),
        (name = "game", description = "WebSocket operations for quiz clients"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_public_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/public/rooms/{room_id}"));
        assert!(doc.paths.paths.contains_key("/ws"));
    }
}

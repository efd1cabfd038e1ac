use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::game::{HistoryEntry, RoomSummary},
    error::AppError,
    services::public_service,
    state::SharedState,
};

/// Public read-only endpoints exposing the live rooms and the game history.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/public/rooms/{room_id}", get(get_room))
        .route("/public/history", get(get_history))
}

#[utoipa::path(
    get,
    path = "/public/rooms/{room_id}",
    tag = "public",
    params(("room_id" = String, Path, description = "Room code")),
    responses(
        (status = 200, description = "Live room", body = RoomSummary),
        (status = 404, description = "No such room")
    )
)]
/// Return the state of a live room, used by the lobby screen before joining.
pub async fn get_room(
    State(state): State<SharedState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, AppError> {
    let payload = public_service::get_room(&state, &room_id).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/public/history",
    tag = "public",
    responses((status = 200, description = "Completed games", body = [HistoryEntry]))
)]
/// Return every completed game.
pub async fn get_history(
    State(state): State<SharedState>,
) -> Result<Json<Vec<HistoryEntry>>, AppError> {
    let payload = public_service::get_history(&state).await?;
    Ok(Json(payload))
}

use crate::{
    dto::game::{HistoryEntry, RoomSummary},
    error::AppError,
    state::SharedState,
};

/// Summary of a live room.
pub async fn get_room(state: &SharedState, room_id: &str) -> Result<RoomSummary, AppError> {
    Ok(state.rooms().room_summary(room_id).await?)
}

/// Every completed game recorded so far.
pub async fn get_history(state: &SharedState) -> Result<Vec<HistoryEntry>, AppError> {
    Ok(state.history().list_history().await?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{history::InMemoryHistory, question_bank::JsonQuestionBank},
        state::AppState,
    };

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(JsonQuestionBank::default()),
            Arc::new(InMemoryHistory::new()),
        );

        assert!(matches!(
            get_room(&state, "4242").await,
            Err(AppError::NotFound(_))
        ));
        assert!(get_history(&state).await.unwrap().is_empty());
    }
}

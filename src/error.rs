use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Errors reported to clients by room operations.
///
/// These are expected outcomes (bad room code, taken username...) that the caller must branch
/// on; they are serialized into the `error` field of an acknowledgement.
#[derive(Debug, Error)]
pub enum RoomError {
    /// No live room has this code.
    #[error("the room does not exist")]
    RoomNotFound,
    /// The host closed the lobby.
    #[error("the room is locked")]
    RoomLocked,
    /// The trimmed username is empty.
    #[error("the username cannot be empty")]
    EmptyUsername,
    /// Another participant already uses this username.
    #[error("this username is already taken")]
    UsernameTaken,
    /// The host banned this username from the room.
    #[error("this username has been banned from the room")]
    UsernameBanned,
    /// The connection is already a participant of this room.
    #[error("you are already in this room")]
    AlreadyInRoom,
    /// Reconnection data does not match a known member of the room.
    #[error("reconnection is not permitted")]
    RejoinRefused,
    /// Only the host of the room may perform this action.
    #[error("only the host can perform this action")]
    NotHost,
    /// The question bank has no quiz with this identifier.
    #[error("quiz `{0}` not found")]
    QuizNotFound(String),
    /// The question bank holds too few multiple choice questions for a random game.
    #[error("not enough questions to build a random game ({available} available, {required} required)")]
    NotEnoughQuestions {
        /// Questions found in the bank.
        available: usize,
        /// Minimum required.
        required: usize,
    },
    /// Every room code of the configured range is in use.
    #[error("no room code available")]
    NoRoomAvailable,
    /// The request payload is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// A collaborator failed.
    #[error("question bank unavailable")]
    Storage(#[from] StorageError),
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Service unavailable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<RoomError> for AppError {
    fn from(err: RoomError) -> Self {
        match err {
            RoomError::Storage(source) => source.into(),
            other => AppError::NotFound(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

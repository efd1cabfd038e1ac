use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::warn;

use crate::{
    dto::game::{
        GameStatePayload, HistogramData, JoinRequest, QrlAnswer, QrlGradedAnswer, Score,
        SetChatRequest, User, UserConnectionUpdate, UserGameInfo, UserStat,
    },
    error::RoomError,
};

/// Events accepted from quiz clients over the WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Host opens a room for a stored quiz.
    #[serde(rename = "game:create")]
    Create(String),
    /// Host opens a room with randomly drawn questions.
    #[serde(rename = "game:create-random")]
    CreateRandom,
    /// Host starts a solo practice run of a stored quiz.
    #[serde(rename = "game:create-test")]
    CreateTest(String),
    #[serde(rename = "game:join")]
    Join(JoinRequest),
    /// Reconnect with the identity received on create or join.
    #[serde(rename = "game:rejoin")]
    Rejoin(User),
    #[serde(rename = "game:leave")]
    Leave,
    #[serde(rename = "game:choice")]
    Choice(Vec<bool>),
    #[serde(rename = "game:validate")]
    Validate,
    /// Host advances the game (or skips the open question).
    #[serde(rename = "game:confirm")]
    Confirm,
    /// Host locks (`true`) or unlocks the lobby.
    #[serde(rename = "game:toggle")]
    Toggle(bool),
    #[serde(rename = "game:ban")]
    Ban(String),
    #[serde(rename = "game:panic")]
    Panic,
    #[serde(rename = "game:pause")]
    Pause,
    #[serde(rename = "game:set-chat")]
    SetChat(SetChatRequest),
    /// Host grades of the open-ended answers.
    #[serde(rename = "game:answers")]
    Answers(Vec<QrlAnswer>),
    #[serde(rename = "game:qrl-answer")]
    QrlAnswer(String),
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Messages pushed to quiz clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "game:state")]
    State(GameStatePayload),
    #[serde(rename = "game:score")]
    Score(Score),
    #[serde(rename = "game:users-stat")]
    UsersStat(Vec<UserStat>),
    /// Live distribution of the open question.
    #[serde(rename = "game:histogram")]
    Histogram(HistogramData),
    /// Distribution of every question asked so far.
    #[serde(rename = "game:histogram-history")]
    HistogramHistory(Vec<HistogramData>),
    #[serde(rename = "game:user-connection")]
    UserConnection(UserConnectionUpdate),
    #[serde(rename = "game:alert")]
    Alert(String),
    #[serde(rename = "game:user-info")]
    UserGameInfo(UserGameInfo),
    #[serde(rename = "game:qrl-graded")]
    QrlGraded(QrlGradedAnswer),
    #[serde(rename = "game:qrl-result")]
    QrlResult(Vec<QrlAnswer>),
    /// Answers handed to the host for grading.
    #[serde(rename = "game:qrl-answers")]
    QrlAnswers(Vec<QrlAnswer>),
    /// Remaining seconds of the running countdown.
    #[serde(rename = "game:timer")]
    Timer(u32),
    #[serde(rename = "game:panic")]
    Panic,
    /// `true` when the countdown was paused, `false` when resumed.
    #[serde(rename = "game:pause")]
    Pause(bool),
    #[serde(rename = "game:chat-permission")]
    ChatPermission(bool),
    /// The receiving connection was evicted from its room; carries the reason.
    #[serde(rename = "game:removed")]
    Removed(String),
    #[serde(rename = "game:delete-room")]
    DeleteRoom,
    #[serde(rename = "chat:system")]
    SystemMessage(SystemMessage),
    #[serde(rename = "ack")]
    Ack(Ack),
}

/// Chat line authored by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMessage {
    pub room_id: String,
    pub text: String,
}

/// Answer to a request-style event, mirroring `{ok, data | error}`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub event: String,
    pub ok: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Ack {
    /// Build an acknowledgement from the outcome of a room operation.
    pub fn from_result<T: Serialize>(event: &str, result: Result<T, RoomError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => Self {
                    event: event.into(),
                    ok: true,
                    data: Some(data),
                    error: None,
                },
                Err(err) => {
                    warn!(event, error = %err, "failed to serialize acknowledgement payload");
                    Self {
                        event: event.into(),
                        ok: false,
                        data: None,
                        error: Some("internal error".into()),
                    }
                }
            },
            Err(err) => Self {
                event: event.into(),
                ok: false,
                data: None,
                error: Some(err.to_string()),
            },
        }
    }
}

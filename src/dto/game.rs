use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use validator::Validate;

use crate::state::{
    quiz::{Question, QuestionType},
    state_machine::GameStatus,
    user::{Grade, UserState},
};

/// Identity handed back to a client when it creates or joins a room; required to rejoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub name: String,
    pub room_id: String,
    /// Connection identifier the user was registered with.
    pub user_id: String,
}

/// Join request sent from the lobby screen.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    #[validate(length(min = 1, max = 16))]
    pub game_code: String,
    #[validate(length(max = 32))]
    pub username: String,
}

/// Chat permission change requested by the host.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetChatRequest {
    pub username: String,
    pub value: bool,
}

/// Successful join or rejoin answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JoinedGame {
    pub user: User,
    pub title: String,
    pub game_state: GameStatePayload,
}

/// Current state of a room, optionally carrying its state-specific payload.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GameStatePayload {
    pub state: GameStatus,
    pub payload: Option<StatePayload>,
}

impl GameStatePayload {
    /// Payload-less state notification.
    pub fn bare(state: GameStatus) -> Self {
        Self {
            state,
            payload: None,
        }
    }
}

/// State-specific payload: the quiz title while starting, the question otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum StatePayload {
    Title(String),
    Question(QuestionSnapshot),
}

/// Serializable view of a question.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuestionSnapshot {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub points: u32,
    pub choices: Vec<ChoiceSnapshot>,
}

/// Serializable view of a choice.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChoiceSnapshot {
    pub text: String,
    pub is_correct: bool,
}

impl From<&Question> for QuestionSnapshot {
    fn from(question: &Question) -> Self {
        Self {
            text: question.text.clone(),
            kind: question.kind,
            points: question.points,
            choices: question
                .choices
                .iter()
                .map(|choice| ChoiceSnapshot {
                    text: choice.text.clone(),
                    is_correct: choice.is_correct,
                })
                .collect(),
        }
    }
}

/// Score notification sent to a single player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct Score {
    pub score: f64,
    /// Whether the last scored question awarded the speed bonus.
    pub bonus: bool,
}

/// One row of the host's player list.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UserStat {
    pub username: String,
    pub score: f64,
    pub bonus_count: u32,
    pub state: UserState,
    pub can_chat: bool,
}

/// Answer state pushed back to a player so the client can restore its selection.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UserGameInfo {
    pub choice: Vec<bool>,
    pub validate: bool,
}

/// Broadcast when a participant joins, leaves or reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UserConnectionUpdate {
    pub is_connected: bool,
    pub username: String,
}

/// Per-question answer distribution.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type")]
pub enum HistogramData {
    /// How many players selected each choice.
    #[serde(rename = "QCM")]
    Qcm {
        text: String,
        choices: Vec<ChoiceTally>,
    },
    /// Typing activity while open, then grade distribution once graded.
    #[serde(rename = "QRL")]
    Qrl {
        text: String,
        active: usize,
        inactive: usize,
        grades: GradeDistribution,
    },
}

/// Selection count of one choice.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChoiceTally {
    pub text: String,
    pub is_correct: bool,
    pub count: usize,
}

/// Number of open-ended answers per grade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct GradeDistribution {
    pub zero: usize,
    pub half: usize,
    pub full: usize,
}

impl GradeDistribution {
    /// Count one more answer with `grade`; ungraded answers are not counted.
    pub fn record(&mut self, grade: Grade) {
        match grade {
            Grade::Ungraded => {}
            Grade::Zero => self.zero += 1,
            Grade::Half => self.half += 1,
            Grade::Full => self.full += 1,
        }
    }
}

/// Open-ended answer of a player, with its grade once the host has evaluated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QrlAnswer {
    pub username: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub grade: Grade,
}

/// Grade notification sent to the graded player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct QrlGradedAnswer {
    pub grade: Grade,
    pub points: f64,
}

/// Entry appended to the game history when a quiz completes.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryEntry {
    pub name: String,
    /// RFC 3339 completion timestamp.
    pub date: String,
    pub number_players: usize,
    pub best_score: f64,
}

/// Public view of a live room.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RoomSummary {
    pub room_id: String,
    pub title: String,
    pub state: GameStatus,
    pub is_locked: bool,
    /// Participants, host included.
    pub participants: usize,
}

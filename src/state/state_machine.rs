use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::state::quiz::QuestionType;

/// Phases a room goes through while a quiz is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Lobby: players join until the host locks the room and confirms.
    Wait,
    /// Countdown before the first question.
    Starting,
    /// A multiple choice question is open.
    AskingQuestionQcm,
    /// An open-ended question is open.
    AskingQuestionQrl,
    /// Open-ended answers are waiting for the host's grades.
    WaitingForAnswers,
    /// Correct answer and scores of the last question are displayed.
    ShowResults,
    /// Results of the final question are displayed.
    LastQuestion,
    /// Final leaderboard and histograms.
    ShowFinalResults,
}

impl GameStatus {
    /// Whether a question is currently open for answers.
    pub fn is_asking(self) -> bool {
        matches!(
            self,
            GameStatus::AskingQuestionQcm | GameStatus::AskingQuestionQrl
        )
    }

    /// Whether the correct answer may be revealed in this state.
    pub fn reveals_answer(self) -> bool {
        matches!(self, GameStatus::ShowResults | GameStatus::LastQuestion)
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    /// Host confirmed a locked lobby.
    Start,
    /// Open the next question.
    AskQuestion(QuestionType),
    /// Close an open-ended question and hand the answers to the host.
    AwaitGrading,
    /// Publish the results of the current question.
    ShowResults {
        /// Whether the current question is the final one.
        last: bool,
    },
    /// Move from the last question results to the final leaderboard.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The status the room was in when the invalid event was received.
    pub from: GameStatus,
    /// The event that cannot be applied from this status.
    pub event: GameEvent,
}

/// State machine implementing the quiz flow of a single room.
#[derive(Debug, Clone)]
pub struct GameStateMachine {
    status: GameStatus,
}

impl Default for GameStateMachine {
    fn default() -> Self {
        Self {
            status: GameStatus::Wait,
        }
    }
}

impl GameStateMachine {
    /// Create a new state machine initialised in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current status.
    pub fn status(&self) -> GameStatus {
        self.status
    }

    /// Apply `event`, returning the new status.
    pub fn apply(&mut self, event: GameEvent) -> Result<GameStatus, InvalidTransition> {
        let next = self.compute_transition(event)?;
        self.status = next;
        Ok(next)
    }

    /// Compute a transition from an event if the transition is valid.
    fn compute_transition(&self, event: GameEvent) -> Result<GameStatus, InvalidTransition> {
        let next = match (self.status, event) {
            (GameStatus::Wait, GameEvent::Start) => GameStatus::Starting,
            (GameStatus::Starting | GameStatus::ShowResults, GameEvent::AskQuestion(kind)) => {
                match kind {
                    QuestionType::Qcm => GameStatus::AskingQuestionQcm,
                    QuestionType::Qrl => GameStatus::AskingQuestionQrl,
                }
            }
            (GameStatus::AskingQuestionQrl, GameEvent::AwaitGrading) => {
                GameStatus::WaitingForAnswers
            }
            (
                GameStatus::AskingQuestionQcm
                | GameStatus::AskingQuestionQrl
                | GameStatus::WaitingForAnswers,
                GameEvent::ShowResults { last },
            ) => {
                if last {
                    GameStatus::LastQuestion
                } else {
                    GameStatus::ShowResults
                }
            }
            (GameStatus::LastQuestion, GameEvent::Finish) => GameStatus::ShowFinalResults,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Kind of question asked to the players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum QuestionType {
    /// Multiple choice question, scored automatically.
    #[serde(rename = "QCM")]
    Qcm,
    /// Open-ended question, graded by the host.
    #[serde(rename = "QRL")]
    Qrl,
}

/// A single selectable answer of a multiple choice question.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// Label displayed to the players.
    pub text: String,
    /// Whether selecting this choice is part of the correct answer.
    pub is_correct: bool,
}

/// Runtime representation of a question of the quiz being played.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Statement of the question.
    pub text: String,
    /// Question kind, selecting the asking sub-state.
    pub kind: QuestionType,
    /// Points awarded for a fully correct answer.
    pub points: u32,
    /// Available choices (empty for open-ended questions).
    pub choices: Vec<Choice>,
}

impl Question {
    /// Canonical answer vector: one flag per choice, `true` when the choice must be selected.
    pub fn correct_answers(&self) -> Vec<bool> {
        self.choices.iter().map(|choice| choice.is_correct).collect()
    }

    /// Projection hiding which choices are correct, safe to send while the question is open.
    pub fn without_answer(&self) -> Self {
        Self {
            choices: self
                .choices
                .iter()
                .map(|choice| Choice {
                    text: choice.text.clone(),
                    is_correct: false,
                })
                .collect(),
            ..self.clone()
        }
    }
}

/// Immutable quiz content played inside a room.
#[derive(Debug, Clone, PartialEq)]
pub struct Quiz {
    /// Identifier of the quiz in the question bank (empty for generated quizzes).
    pub id: String,
    /// Title announced when the game starts and recorded in the history.
    pub title: String,
    /// Answer time, in seconds, of multiple choice questions.
    pub duration_s: u32,
    /// Ordered questions.
    pub questions: Vec<Question>,
}

impl Quiz {
    /// Question at `index`, if any.
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Whether `index` designates the final question of the quiz.
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.questions.len()
    }
}

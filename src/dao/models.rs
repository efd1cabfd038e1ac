use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::{
    dto::validation::{validate_points, validate_qcm_choices},
    state::quiz::{Choice, Question, QuestionType, Quiz},
};

/// Quiz definition as stored in the catalogue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct QuizEntity {
    /// Stable identifier used by `game:create`.
    #[validate(length(min = 1))]
    pub id: String,
    /// Title announced when the game starts.
    #[validate(length(min = 1))]
    pub title: String,
    /// Answer time, in seconds, of the multiple choice questions.
    #[validate(range(min = 10, max = 60))]
    pub duration: u32,
    /// Ordered questions.
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionEntity>,
}

/// Question entry inside a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEntity {
    /// Statement of the question.
    pub text: String,
    /// `QCM` or `QRL`.
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Points awarded for a fully correct answer.
    pub points: u32,
    /// Choices of a multiple choice question.
    #[serde(default)]
    pub choices: Vec<ChoiceEntity>,
}

impl Validate for QuestionEntity {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Err(e) = validate_points(self.points) {
            errors.add("points", e);
        }

        if self.kind == QuestionType::Qcm {
            let flags: Vec<bool> = self.choices.iter().map(|choice| choice.is_correct).collect();
            if let Err(e) = validate_qcm_choices(&flags) {
                errors.add("choices", e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Choice entry inside a multiple choice question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceEntity {
    /// Label displayed to the players.
    pub text: String,
    /// Whether the choice belongs to the correct answer.
    #[serde(default)]
    pub is_correct: bool,
}

impl From<ChoiceEntity> for Choice {
    fn from(entity: ChoiceEntity) -> Self {
        Self {
            text: entity.text,
            is_correct: entity.is_correct,
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(entity: QuestionEntity) -> Self {
        Self {
            text: entity.text,
            kind: entity.kind,
            points: entity.points,
            choices: entity.choices.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<QuizEntity> for Quiz {
    fn from(entity: QuizEntity) -> Self {
        Self {
            id: entity.id,
            title: entity.title,
            duration_s: entity.duration,
            questions: entity.questions.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(points: u32, choices: &[bool]) -> QuestionEntity {
        QuestionEntity {
            text: "Capital of France?".into(),
            kind: QuestionType::Qcm,
            points,
            choices: choices
                .iter()
                .enumerate()
                .map(|(index, is_correct)| ChoiceEntity {
                    text: format!("choice {index}"),
                    is_correct: *is_correct,
                })
                .collect(),
        }
    }

    #[test]
    fn quiz_is_validated_recursively() {
        let mut quiz = QuizEntity {
            id: "capitals".into(),
            title: "Capitals".into(),
            duration: 20,
            questions: vec![question(40, &[true, false])],
        };
        assert!(quiz.validate().is_ok());

        quiz.questions.push(question(45, &[true, false]));
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn open_ended_questions_need_no_choices() {
        let entity = QuestionEntity {
            text: "Why?".into(),
            kind: QuestionType::Qrl,
            points: 30,
            choices: vec![],
        };
        assert!(entity.validate().is_ok());
    }

    #[test]
    fn quiz_without_questions_is_rejected() {
        let quiz = QuizEntity {
            id: "empty".into(),
            title: "Empty".into(),
            duration: 20,
            questions: vec![],
        };
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn entity_converts_to_runtime_quiz() {
        let quiz: Quiz = QuizEntity {
            id: "capitals".into(),
            title: "Capitals".into(),
            duration: 20,
            questions: vec![question(40, &[true, false])],
        }
        .into();
        assert_eq!(quiz.duration_s, 20);
        assert_eq!(quiz.questions[0].correct_answers(), vec![true, false]);
    }
}

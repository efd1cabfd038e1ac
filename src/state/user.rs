use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Display state of a participant, as shown in the host's player list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    /// Nothing selected yet for the current question.
    NoInteraction,
    /// At least one choice was touched or some text typed.
    FirstInteraction,
    /// The answer has been locked in.
    AnswerConfirmed,
    /// The participant has no live connection.
    Disconnected,
    /// The quiz is over.
    FinalResults,
}

/// Host evaluation of an open-ended answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    /// Not graded yet.
    #[default]
    Ungraded,
    /// No credit.
    Zero,
    /// Half of the question points.
    Half,
    /// Full credit.
    Full,
}

impl Grade {
    /// Fraction of the question points awarded for this grade.
    pub fn fraction(self) -> f64 {
        match self {
            Grade::Ungraded | Grade::Zero => 0.0,
            Grade::Half => 0.5,
            Grade::Full => 1.0,
        }
    }
}

/// Mutable state of one participant inside one room.
#[derive(Debug, Clone)]
pub struct UserData {
    /// Current transport identifier; swapped on reconnection.
    pub connection_id: String,
    /// Display name, unique (case-insensitively) inside the room.
    pub username: String,
    /// Room the participant belongs to.
    pub room_id: String,
    /// Accumulated score.
    pub score: f64,
    /// Number of speed bonuses received.
    pub bonus_count: u32,
    /// Whether the last scored question awarded a bonus.
    pub last_bonus_applied: bool,
    /// Selected choices of the current multiple choice question.
    pub current_choice: Option<Vec<bool>>,
    /// Typed answer of the current open-ended question.
    pub current_answer: Option<String>,
    /// Epoch milliseconds at which the answer was locked in.
    pub validated_at_ms: Option<u64>,
    /// Grade received for the current open-ended answer.
    pub grade: Grade,
    /// Epoch milliseconds of the last answer edit, used for the QRL activity histogram.
    pub last_interaction_ms: Option<u64>,
    /// Whether the participant may post in the room chat.
    pub can_chat: bool,
    /// Whether the participant holds a live connection to the room.
    pub is_active: bool,
    /// Display state.
    pub state: UserState,
}

impl UserData {
    /// Create a fresh participant with no score.
    pub fn new(
        connection_id: impl Into<String>,
        username: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            username: username.into(),
            room_id: room_id.into(),
            score: 0.0,
            bonus_count: 0,
            last_bonus_applied: false,
            current_choice: None,
            current_answer: None,
            validated_at_ms: None,
            grade: Grade::Ungraded,
            last_interaction_ms: None,
            can_chat: true,
            is_active: true,
            state: UserState::NoInteraction,
        }
    }

    /// Whether this participant is the room host, identified by the reserved username.
    pub fn is_host(&self, host_username: &str) -> bool {
        self.username == host_username
    }

    /// Whether an answer has been locked in for the current question.
    pub fn has_validated(&self) -> bool {
        self.validated_at_ms.is_some()
    }

    /// Lock in the current answer. Returns `false` if it was already locked.
    pub fn validate(&mut self, now_ms: u64) -> bool {
        if self.has_validated() {
            return false;
        }
        self.validated_at_ms = Some(now_ms);
        self.state = UserState::AnswerConfirmed;
        true
    }

    /// Replace the selected choices unless the answer is already locked.
    pub fn set_choice(&mut self, choices: Vec<bool>) -> bool {
        if self.has_validated() {
            return false;
        }
        self.current_choice = Some(choices);
        self.state = UserState::FirstInteraction;
        true
    }

    /// Replace the typed answer unless it is already locked.
    pub fn set_answer(&mut self, answer: String, now_ms: u64) -> bool {
        if self.has_validated() {
            return false;
        }
        self.current_answer = Some(answer);
        self.last_interaction_ms = Some(now_ms);
        self.state = UserState::FirstInteraction;
        true
    }

    /// Whether the selection matches `correct` exactly.
    ///
    /// A selection shorter than the canonical answer never matches.
    pub fn is_correct(&self, correct: &[bool]) -> bool {
        match &self.current_choice {
            Some(choice) if choice.len() >= correct.len() => {
                correct.iter().zip(choice).all(|(expected, got)| expected == got)
            }
            _ => false,
        }
    }

    /// Add points, optionally as a speed bonus.
    pub fn add_score(&mut self, points: f64, bonus: bool) {
        self.score += points;
        self.last_bonus_applied = bonus;
        if bonus {
            self.bonus_count += 1;
        }
    }

    /// Clear every per-question field.
    pub fn reset_answer(&mut self) {
        self.current_choice = None;
        self.current_answer = None;
        self.validated_at_ms = None;
        self.grade = Grade::Ungraded;
        self.last_interaction_ms = None;
        self.last_bonus_applied = false;
        self.state = UserState::NoInteraction;
    }

    /// Whether the answer was edited within `window_ms` of `now_ms`.
    pub fn interacted_within(&self, now_ms: u64, window_ms: u64) -> bool {
        self.last_interaction_ms
            .is_some_and(|last| now_ms.saturating_sub(last) <= window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bob() -> UserData {
        UserData::new("b1", "Bob", "1234")
    }

    #[test]
    fn validated_answer_is_immutable() {
        let mut user = bob();
        assert!(user.set_choice(vec![true, false]));
        assert!(user.validate(10));
        assert!(!user.set_choice(vec![false, true]));
        assert!(!user.validate(20));
        assert_eq!(user.current_choice, Some(vec![true, false]));
        assert_eq!(user.validated_at_ms, Some(10));
        assert_eq!(user.state, UserState::AnswerConfirmed);
    }

    #[test]
    fn shorter_selection_is_never_correct() {
        let mut user = bob();
        user.set_choice(vec![true]);
        assert!(!user.is_correct(&[true, false]));

        user.set_choice(vec![true, false]);
        assert!(user.is_correct(&[true, false]));
    }

    #[test]
    fn missing_selection_is_not_correct() {
        assert!(!bob().is_correct(&[true, false]));
    }

    #[test]
    fn reset_clears_round_state_but_keeps_score() {
        let mut user = bob();
        user.set_choice(vec![true]);
        user.validate(5);
        user.add_score(48.0, true);
        user.reset_answer();

        assert!(user.current_choice.is_none());
        assert!(!user.has_validated());
        assert_eq!(user.state, UserState::NoInteraction);
        assert_eq!(user.score, 48.0);
        assert_eq!(user.bonus_count, 1);
    }

    #[test]
    fn grade_fractions() {
        assert_eq!(Grade::Ungraded.fraction(), 0.0);
        assert_eq!(Grade::Half.fraction(), 0.5);
        assert_eq!(Grade::Full.fraction(), 1.0);
    }
}

use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use tracing::debug;

use crate::{
    config::GameSettings,
    dto::game::{
        ChoiceTally, GradeDistribution, QrlAnswer, QrlGradedAnswer, Score, UserGameInfo, UserStat,
    },
    services::gateway::Gateway,
    state::{
        quiz::Choice,
        user::{Grade, UserData, UserState},
    },
};

/// Participants of one room, keyed by connection identifier in join order.
pub struct Users {
    room_id: String,
    users: IndexMap<String, UserData>,
    connected: HashSet<String>,
    /// Lower-cased banned usernames.
    banned: HashSet<String>,
    host_plays: bool,
    settings: Arc<GameSettings>,
    gateway: Arc<dyn Gateway>,
}

impl Users {
    /// Create an empty registry for `room_id`.
    ///
    /// When `host_plays` is set the host answers questions like any other player and appears in
    /// the statistics.
    pub fn new(
        room_id: impl Into<String>,
        host_plays: bool,
        settings: Arc<GameSettings>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            users: IndexMap::new(),
            connected: HashSet::new(),
            banned: HashSet::new(),
            host_plays,
            settings,
            gateway,
        }
    }

    /// Whether the host takes part in the quiz.
    pub fn host_plays(&self) -> bool {
        self.host_plays
    }

    /// Number of registered participants, host included.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no participant is registered.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Look up a participant by connection identifier.
    pub fn get(&self, connection_id: &str) -> Option<&UserData> {
        self.users.get(connection_id)
    }

    /// Connection identifiers of every participant.
    pub fn connection_ids(&self) -> Vec<String> {
        self.users.keys().cloned().collect()
    }

    /// Usernames in join order, host included.
    pub fn usernames(&self) -> Vec<String> {
        self.users.values().map(|user| user.username.clone()).collect()
    }

    /// The host, found by its reserved username.
    pub fn host(&self) -> Option<&UserData> {
        self.users
            .values()
            .find(|user| user.is_host(&self.settings.host_username))
    }

    /// Connection identifier of the host.
    pub fn host_id(&self) -> Option<String> {
        self.host().map(|host| host.connection_id.clone())
    }

    /// Whether `connection_id` belongs to the host.
    pub fn is_host(&self, connection_id: &str) -> bool {
        self.users
            .get(connection_id)
            .is_some_and(|user| user.is_host(&self.settings.host_username))
    }

    /// Whether `username` is used by a participant, ignoring case.
    pub fn has_username(&self, username: &str) -> bool {
        let wanted = username.to_lowercase();
        self.users
            .values()
            .any(|user| user.username.to_lowercase() == wanted)
    }

    /// Whether `username` has been banned from the room, ignoring case.
    pub fn is_banned(&self, username: &str) -> bool {
        self.banned.contains(&username.to_lowercase())
    }

    /// Whether `connection_id` currently holds a live connection.
    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.connected.contains(connection_id)
    }

    /// Register a participant and send them their answer state.
    pub fn add_user(&mut self, user: UserData) {
        let connection_id = user.connection_id.clone();
        self.connected.insert(connection_id.clone());
        self.users.insert(connection_id.clone(), user);
        self.send_game_info(&connection_id);
    }

    /// Remove a participant, returning their data.
    pub fn remove_user(&mut self, connection_id: &str) -> Option<UserData> {
        self.connected.remove(connection_id);
        self.users.shift_remove(connection_id)
    }

    /// Remove `username` and ban it for the lifetime of the room.
    ///
    /// Returns the evicted connection identifier; `None` when nobody (or the host) uses the name.
    pub fn ban_user(&mut self, username: &str) -> Option<String> {
        let wanted = username.to_lowercase();
        let connection_id = self
            .users
            .values()
            .find(|user| {
                user.username.to_lowercase() == wanted
                    && !user.is_host(&self.settings.host_username)
            })
            .map(|user| user.connection_id.clone())?;

        self.remove_user(&connection_id);
        self.banned.insert(wanted);
        Some(connection_id)
    }

    /// Flag a participant as having lost their connection.
    pub fn mark_disconnected(&mut self, connection_id: &str) -> bool {
        let Some(user) = self.users.get_mut(connection_id) else {
            return false;
        };
        user.is_active = false;
        self.connected.remove(connection_id)
    }

    /// Move a participant to a new connection identifier, keeping score and answers.
    pub fn update(&mut self, old_id: &str, new_id: &str) -> bool {
        let Some(index) = self.users.get_index_of(old_id) else {
            return false;
        };
        let Some((_, mut user)) = self.users.shift_remove_index(index) else {
            return false;
        };
        user.connection_id = new_id.to_string();
        user.is_active = true;
        self.connected.remove(old_id);
        self.connected.insert(new_id.to_string());

        // Keep the original join order.
        let (last, _) = self.users.insert_full(new_id.to_string(), user);
        self.users.move_index(last, index);
        true
    }

    /// Record the selection of a player. Ignored once the answer is validated.
    pub fn handle_choice(&mut self, connection_id: &str, choices: Vec<bool>) -> bool {
        let Some(user) = self.users.get_mut(connection_id) else {
            return false;
        };
        if !user.set_choice(choices) {
            debug!(room_id = %self.room_id, connection_id, "choice ignored after validation");
            return false;
        }
        true
    }

    /// Record the typed answer of a player. Ignored once the answer is validated.
    pub fn handle_qrl_answer(&mut self, connection_id: &str, answer: String, now_ms: u64) -> bool {
        self.users
            .get_mut(connection_id)
            .is_some_and(|user| user.set_answer(answer, now_ms))
    }

    /// Lock in the answer of a player.
    pub fn validate(&mut self, connection_id: &str, now_ms: u64) -> bool {
        let validated = self
            .users
            .get_mut(connection_id)
            .is_some_and(|user| user.validate(now_ms));
        if validated {
            self.send_game_info(connection_id);
        }
        validated
    }

    /// Lock in every answer still open, stamped with `now_ms`.
    pub fn validate_remaining(&mut self, now_ms: u64) {
        let host_username = self.settings.host_username.clone();
        let host_plays = self.host_plays;
        for user in self.users.values_mut() {
            if host_plays || !user.is_host(&host_username) {
                user.validate(now_ms);
            }
        }
    }

    /// Whether every answering participant has locked in an answer.
    pub fn all_have_validated(&self) -> bool {
        self.respondents().all(UserData::has_validated)
    }

    /// Score the current multiple choice question.
    ///
    /// Fully correct players are ranked by validation time. The fastest one earns
    /// `points * bonus_multiplier` unless the runner-up validated within the bonus window, in
    /// which case nobody gets the bonus. Every answering player receives a score update.
    pub fn update_users_score(&mut self, correct_answers: &[bool], points: u32) {
        let points = f64::from(points);

        let mut correct: Vec<(u64, String)> = self
            .respondents()
            .filter(|user| user.is_correct(correct_answers))
            .map(|user| {
                (
                    user.validated_at_ms.unwrap_or(u64::MAX),
                    user.connection_id.clone(),
                )
            })
            .collect();
        correct.sort();

        let bonus_id = match correct.as_slice() {
            [(_, first)] => Some(first.clone()),
            [(first_at, first), (second_at, _), ..]
                if second_at.saturating_sub(*first_at) > self.settings.bonus_window_ms =>
            {
                Some(first.clone())
            }
            _ => None,
        };

        let scored: Vec<String> = self
            .respondents()
            .map(|user| user.connection_id.clone())
            .collect();
        for connection_id in scored {
            let Some(user) = self.users.get_mut(&connection_id) else {
                continue;
            };
            if bonus_id.as_deref() == Some(connection_id.as_str()) {
                user.add_score(points * self.settings.bonus_multiplier, true);
            } else if user.is_correct(correct_answers) {
                user.add_score(points, false);
            } else {
                user.add_score(0.0, false);
            }
            let score = Score {
                score: user.score,
                bonus: user.last_bonus_applied,
            };
            self.gateway.send_score_update(&connection_id, score);
        }
    }

    /// Open-ended answers of the answering participants, with their current grade.
    pub fn qrl_answers(&self) -> Vec<QrlAnswer> {
        self.respondents()
            .map(|user| QrlAnswer {
                username: user.username.clone(),
                answer: user.current_answer.clone().unwrap_or_default(),
                grade: user.grade,
            })
            .collect()
    }

    /// Apply the host grades of the current open-ended question and notify each graded player.
    ///
    /// Grades naming unknown players are ignored; players left out stay ungraded and earn nothing.
    pub fn grade_answers(&mut self, grades: &[QrlAnswer], points: u32) -> GradeDistribution {
        let points = f64::from(points);
        let mut distribution = GradeDistribution::default();
        let respondents: Vec<String> = self
            .respondents()
            .map(|user| user.connection_id.clone())
            .collect();

        for connection_id in respondents {
            let Some(user) = self.users.get_mut(&connection_id) else {
                continue;
            };
            let grade = grades
                .iter()
                .find(|graded| graded.username.eq_ignore_ascii_case(&user.username))
                .map(|graded| graded.grade)
                .unwrap_or(Grade::Ungraded);
            let earned = points * grade.fraction();

            user.grade = grade;
            user.add_score(earned, false);
            distribution.record(grade);

            self.gateway.send_qrl_graded_answer(
                &connection_id,
                QrlGradedAnswer {
                    grade,
                    points: earned,
                },
            );
            self.gateway.send_score_update(
                &connection_id,
                Score {
                    score: user.score,
                    bonus: false,
                },
            );
        }
        distribution
    }

    /// Grades used when nobody grades: full credit for any non-empty answer.
    pub fn automatic_grades(&self) -> Vec<QrlAnswer> {
        self.qrl_answers()
            .into_iter()
            .map(|mut answer| {
                answer.grade = if answer.answer.trim().is_empty() {
                    Grade::Zero
                } else {
                    Grade::Full
                };
                answer
            })
            .collect()
    }

    /// Clear every answer for the next question and resend each player's answer state.
    pub fn reset_answers(&mut self) {
        for user in self.users.values_mut() {
            user.reset_answer();
        }
        for connection_id in self.connection_ids() {
            self.send_game_info(&connection_id);
        }
    }

    /// How many players currently have each choice selected.
    pub fn current_histogram_data(&self, choices: &[Choice]) -> Vec<ChoiceTally> {
        choices
            .iter()
            .enumerate()
            .map(|(index, choice)| ChoiceTally {
                text: choice.text.clone(),
                is_correct: choice.is_correct,
                count: self
                    .respondents()
                    .filter(|user| {
                        user.current_choice
                            .as_ref()
                            .is_some_and(|selected| selected.get(index).copied().unwrap_or(false))
                    })
                    .count(),
            })
            .collect()
    }

    /// Players who edited their open-ended answer within the activity window, and the others.
    pub fn qrl_activity(&self, now_ms: u64) -> (usize, usize) {
        let window = self.settings.qrl_activity_window_ms;
        self.respondents()
            .fold((0, 0), |(active, inactive), user| {
                if user.interacted_within(now_ms, window) {
                    (active + 1, inactive)
                } else {
                    (active, inactive + 1)
                }
            })
    }

    /// Player list shown to the host; the host only appears when playing.
    pub fn users_stat(&self) -> Vec<UserStat> {
        self.respondents()
            .map(|user| UserStat {
                username: user.username.clone(),
                score: user.score,
                bonus_count: user.bonus_count,
                state: if self.connected.contains(&user.connection_id) {
                    user.state
                } else {
                    UserState::Disconnected
                },
                can_chat: user.can_chat,
            })
            .collect()
    }

    /// Change the chat permission of `username`, returning its connection identifier.
    pub fn set_chat(&mut self, username: &str, value: bool) -> Option<String> {
        let user = self
            .users
            .values_mut()
            .find(|user| user.username.eq_ignore_ascii_case(username))?;
        user.can_chat = value;
        Some(user.connection_id.clone())
    }

    /// Switch every participant to the final results display state.
    pub fn set_final_results(&mut self) {
        for user in self.users.values_mut() {
            user.state = UserState::FinalResults;
        }
    }

    /// Highest score among the answering participants.
    pub fn best_score(&self) -> f64 {
        self.respondents()
            .map(|user| user.score)
            .fold(0.0, f64::max)
    }

    /// Number of participants answering questions.
    pub fn player_count(&self) -> usize {
        self.respondents().count()
    }

    /// Score of one participant.
    pub fn score_of(&self, connection_id: &str) -> Option<Score> {
        self.users.get(connection_id).map(|user| Score {
            score: user.score,
            bonus: user.last_bonus_applied,
        })
    }

    /// Answer state of one participant.
    pub fn game_info(&self, connection_id: &str) -> Option<UserGameInfo> {
        self.users.get(connection_id).map(|user| UserGameInfo {
            choice: user.current_choice.clone().unwrap_or_default(),
            validate: user.has_validated(),
        })
    }

    fn send_game_info(&self, connection_id: &str) {
        if let Some(info) = self.game_info(connection_id) {
            self.gateway.send_user_game_info(connection_id, info);
        }
    }

    /// Participants answering questions: everyone but the host, unless the host plays.
    fn respondents(&self) -> impl Iterator<Item = &UserData> {
        let host_username = self.settings.host_username.as_str();
        let host_plays = self.host_plays;
        self.users
            .values()
            .filter(move |user| host_plays || !user.is_host(host_username))
    }
}

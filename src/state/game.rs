//! Per-room orchestration: the quiz state machine, its countdowns and the participants.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    config::GameSettings,
    dao::history::{HistoryStore, completion_date},
    dto::game::{
        GameStatePayload, HistogramData, HistoryEntry, JoinedGame, QrlAnswer, QuestionSnapshot,
        Score, StatePayload, User, UserConnectionUpdate,
    },
    error::RoomError,
    services::gateway::{Gateway, Target},
    state::{
        epoch_ms,
        quiz::{Question, QuestionType, Quiz},
        state_machine::{GameEvent, GameStateMachine, GameStatus},
        timer::CountdownTimer,
        user::UserData,
        users::Users,
    },
};

/// Flavour of a room, deciding who plays and how the game advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameKind {
    /// Stored quiz run by a host for the players.
    Standard,
    /// Randomly drawn questions; the host plays along.
    Random,
    /// Solo practice run of a stored quiz by the host.
    Test,
}

impl GameKind {
    /// Whether the host answers questions, which also makes the game advance on its own.
    pub fn host_plays(self) -> bool {
        !matches!(self, GameKind::Standard)
    }
}

/// Outcome of removing a participant from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Username of the removed participant.
    pub username: String,
    /// Whether the removed participant was the host.
    pub was_host: bool,
    /// Whether the room has no reason to live anymore.
    pub close_room: bool,
}

/// Outcome of banning a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    /// Connection of the banned participant.
    pub connection_id: String,
    /// Whether the room has no reason to live anymore.
    pub close_room: bool,
}

struct GameInner {
    users: Users,
    machine: GameStateMachine,
    question_index: usize,
    is_locked: bool,
    histograms: Vec<HistogramData>,
    /// Typing activity of the last closed open-ended question.
    qrl_activity: (usize, usize),
}

/// One step of a transition chain.
#[derive(Debug)]
enum Step {
    Start,
    Ask,
    CloseQuestion,
    Grade(Vec<QrlAnswer>),
    Results,
    Advance,
    Finish,
}

/// A quiz being played in one room.
pub struct ActiveGame {
    room_id: String,
    quiz: Quiz,
    kind: GameKind,
    settings: Arc<GameSettings>,
    gateway: Arc<dyn Gateway>,
    history: Arc<dyn HistoryStore>,
    timer: CountdownTimer,
    inner: Mutex<GameInner>,
    /// Held by the single transition chain in flight.
    transition_gate: Arc<Mutex<()>>,
    closed: AtomicBool,
    /// Host skip received while the chain was between two countdowns.
    skip_requested: AtomicBool,
}

impl ActiveGame {
    /// Create a room in the lobby state with its host registered.
    pub fn new(
        room_id: impl Into<String>,
        quiz: Quiz,
        kind: GameKind,
        host_connection_id: &str,
        settings: Arc<GameSettings>,
        gateway: Arc<dyn Gateway>,
        history: Arc<dyn HistoryStore>,
    ) -> Arc<Self> {
        let room_id = room_id.into();
        let mut users = Users::new(
            room_id.clone(),
            kind.host_plays(),
            Arc::clone(&settings),
            Arc::clone(&gateway),
        );
        users.add_user(UserData::new(
            host_connection_id,
            settings.host_username.clone(),
            room_id.clone(),
        ));
        let timer = CountdownTimer::new(
            room_id.clone(),
            Arc::clone(&gateway),
            settings.tick(),
            settings.panic_tick(),
        );

        Arc::new(Self {
            room_id,
            quiz,
            kind,
            settings,
            gateway,
            history,
            timer,
            inner: Mutex::new(GameInner {
                users,
                machine: GameStateMachine::new(),
                question_index: 0,
                // Nobody else may join a solo practice run.
                is_locked: kind == GameKind::Test,
                histograms: Vec::new(),
                qrl_activity: (0, 0),
            }),
            transition_gate: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
            skip_requested: AtomicBool::new(false),
        })
    }

    /// Identifier of the room.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Title of the quiz being played.
    pub fn title(&self) -> &str {
        &self.quiz.title
    }

    /// Flavour of the room.
    pub fn kind(&self) -> GameKind {
        self.kind
    }

    /// Current state of the room.
    pub async fn status(&self) -> GameStatus {
        self.inner.lock().await.machine.status()
    }

    /// Whether the lobby is closed to new players.
    pub async fn is_locked(&self) -> bool {
        self.inner.lock().await.is_locked
    }

    /// Index of the current question.
    pub async fn question_index(&self) -> usize {
        self.inner.lock().await.question_index
    }

    /// Usernames in join order, host included.
    pub async fn usernames(&self) -> Vec<String> {
        self.inner.lock().await.users.usernames()
    }

    /// Number of participants, host included.
    pub async fn participant_count(&self) -> usize {
        self.inner.lock().await.users.len()
    }

    /// Score of a participant.
    pub async fn score(&self, connection_id: &str) -> Option<Score> {
        self.inner.lock().await.users.score_of(connection_id)
    }

    /// Current selection of a participant.
    pub async fn choice(&self, connection_id: &str) -> Option<Vec<bool>> {
        self.inner
            .lock()
            .await
            .users
            .get(connection_id)
            .and_then(|user| user.current_choice.clone())
    }

    /// Whether a participant has locked in their answer.
    pub async fn is_validated(&self, connection_id: &str) -> bool {
        self.inner
            .lock()
            .await
            .users
            .get(connection_id)
            .is_some_and(UserData::has_validated)
    }

    /// Whether `connection_id` is the host of the room.
    pub async fn is_host(&self, connection_id: &str) -> bool {
        self.inner.lock().await.users.is_host(connection_id)
    }

    /// Whether `connection_id` belongs to the room.
    pub async fn has_member(&self, connection_id: &str) -> bool {
        self.inner.lock().await.users.get(connection_id).is_some()
    }

    /// State snapshot as seen by `connection_id`.
    pub async fn snapshot_for(&self, connection_id: &str) -> Option<JoinedGame> {
        let inner = self.inner.lock().await;
        self.joined(&inner, connection_id)
    }

    /// Register a player.
    pub async fn add_player(
        &self,
        connection_id: &str,
        username: &str,
    ) -> Result<JoinedGame, RoomError> {
        let username = username.trim();
        let mut inner = self.inner.lock().await;

        if inner.users.get(connection_id).is_some() {
            return Err(RoomError::AlreadyInRoom);
        }
        if inner.is_locked {
            return Err(RoomError::RoomLocked);
        }
        if username.is_empty() {
            return Err(RoomError::EmptyUsername);
        }
        if inner.users.is_banned(username) {
            return Err(RoomError::UsernameBanned);
        }
        if inner.users.has_username(username)
            || username.eq_ignore_ascii_case(&self.settings.host_username)
        {
            return Err(RoomError::UsernameTaken);
        }

        inner
            .users
            .add_user(UserData::new(connection_id, username, self.room_id.clone()));
        info!(room_id = %self.room_id, connection_id, username, "player joined");

        self.gateway.send_user_connection_update(
            &self.room_id,
            UserConnectionUpdate {
                is_connected: true,
                username: username.to_string(),
            },
        );
        self.send_host_stats(&inner);

        self.joined(&inner, connection_id)
            .ok_or_else(|| RoomError::InvalidRequest("player vanished while joining".into()))
    }

    /// Reconnect `username`, formerly known as `old_id`, under `new_id`.
    pub async fn rejoin(
        &self,
        old_id: &str,
        new_id: &str,
        username: &str,
    ) -> Result<JoinedGame, RoomError> {
        let mut inner = self.inner.lock().await;

        if inner.users.is_banned(username) {
            return Err(RoomError::UsernameBanned);
        }
        let known = inner
            .users
            .get(old_id)
            .is_some_and(|user| user.username == username);
        if !known {
            return Err(RoomError::RejoinRefused);
        }

        self.swap_identity(&mut inner, old_id, new_id);
        self.joined(&inner, new_id)
            .ok_or(RoomError::RejoinRefused)
    }

    /// Move a participant to a new connection, re-pushing what a fresh client needs.
    pub async fn update(&self, old_id: &str, new_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        self.swap_identity(&mut inner, old_id, new_id)
    }

    fn swap_identity(&self, inner: &mut GameInner, old_id: &str, new_id: &str) -> bool {
        if !inner.users.update(old_id, new_id) {
            debug!(room_id = %self.room_id, old_id, "identity swap for unknown connection");
            return false;
        }
        let Some(user) = inner.users.get(new_id) else {
            return false;
        };
        let username = user.username.clone();
        let is_host = inner.users.is_host(new_id);
        let status = inner.machine.status();
        info!(room_id = %self.room_id, old_id, new_id, username, "participant reconnected");

        self.gateway.send_user_connection_update(
            &self.room_id,
            UserConnectionUpdate {
                is_connected: true,
                username,
            },
        );
        if let Some(score) = inner.users.score_of(new_id) {
            self.gateway.send_score_update(new_id, score);
        }
        if let Some(info) = inner.users.game_info(new_id) {
            self.gateway.send_user_game_info(new_id, info);
        }
        if is_host || status == GameStatus::ShowFinalResults {
            let target = Target::connection(new_id);
            self.gateway
                .send_users_stat_update(target.clone(), inner.users.users_stat());
            self.gateway
                .send_histogram_history(target, inner.histograms.clone());
        }
        if is_host && status == GameStatus::WaitingForAnswers {
            self.gateway
                .send_qrl_answers(new_id, inner.users.qrl_answers());
        }
        self.send_host_stats(inner);
        true
    }

    /// Remove a participant for good.
    pub async fn remove_user(&self, connection_id: &str) -> Option<Departure> {
        let mut inner = self.inner.lock().await;
        let was_host = inner.users.is_host(connection_id);
        let user = inner.users.remove_user(connection_id)?;
        let close_room = was_host || Self::left_without_players(&inner);

        info!(
            room_id = %self.room_id,
            connection_id,
            username = %user.username,
            close_room,
            "participant removed"
        );

        if !close_room {
            self.gateway.send_user_connection_update(
                &self.room_id,
                UserConnectionUpdate {
                    is_connected: false,
                    username: user.username.clone(),
                },
            );
            self.settle_departure(&inner);
        }

        Some(Departure {
            username: user.username,
            was_host,
            close_room,
        })
    }

    /// Flag a participant whose transport dropped; they stay registered until the grace period
    /// expires.
    pub async fn mark_disconnected(&self, connection_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.users.mark_disconnected(connection_id) {
            return false;
        }
        if let Some(user) = inner.users.get(connection_id) {
            self.gateway.send_user_connection_update(
                &self.room_id,
                UserConnectionUpdate {
                    is_connected: false,
                    username: user.username.clone(),
                },
            );
        }
        self.send_host_stats(&inner);
        true
    }

    /// Ban `username`. Returns the eviction, if the user was present.
    pub async fn ban(&self, by: &str, username: &str) -> Result<Option<Eviction>, RoomError> {
        let mut inner = self.inner.lock().await;
        if !inner.users.is_host(by) {
            return Err(RoomError::NotHost);
        }
        let Some(connection_id) = inner.users.ban_user(username) else {
            return Ok(None);
        };
        let close_room = Self::left_without_players(&inner);
        info!(room_id = %self.room_id, username, close_room, "player banned");
        if !close_room {
            self.settle_departure(&inner);
        }
        Ok(Some(Eviction {
            connection_id,
            close_room,
        }))
    }

    /// Nobody is left, or only a host who does not play once the game has started.
    fn left_without_players(inner: &GameInner) -> bool {
        let only_idle_host = inner.users.len() == 1
            && inner.users.host().is_some()
            && !inner.users.host_plays()
            && inner.machine.status() != GameStatus::Wait;
        inner.users.is_empty() || only_idle_host
    }

    /// Refresh the host view after a departure and end the question if the remaining players
    /// have all answered.
    fn settle_departure(&self, inner: &GameInner) {
        self.send_host_stats(inner);
        if inner.machine.status().is_asking() && inner.users.all_have_validated() {
            debug!(room_id = %self.room_id, "every remaining player answered");
            self.timer.stop();
        }
    }

    /// Lock or unlock the lobby. Only the host may do it, and only before the game starts.
    pub async fn toggle_lock(&self, connection_id: &str, locked: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.users.is_host(connection_id) || inner.machine.status() != GameStatus::Wait {
            debug!(room_id = %self.room_id, connection_id, "lock change ignored");
            return false;
        }
        inner.is_locked = locked;
        info!(room_id = %self.room_id, locked, "lobby lock changed");
        true
    }

    /// Change the chat permission of `username`.
    pub async fn set_chat(&self, by: &str, username: &str, value: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.users.is_host(by) {
            return false;
        }
        let Some(connection_id) = inner.users.set_chat(username, value) else {
            return false;
        };
        self.gateway.send_chat_permission(&connection_id, value);
        self.send_host_stats(&inner);
        true
    }

    /// Record the selection of a player and refresh the live histogram.
    pub async fn handle_choice(&self, connection_id: &str, choices: Vec<bool>) {
        let mut inner = self.inner.lock().await;
        if inner.machine.status() != GameStatus::AskingQuestionQcm {
            debug!(room_id = %self.room_id, connection_id, "choice outside of a question");
            return;
        }
        if !inner.users.handle_choice(connection_id, choices) {
            return;
        }
        if let Some(question) = self.quiz.question(inner.question_index) {
            self.send_live_histogram(&inner, question);
        }
        self.send_host_stats(&inner);
    }

    /// Record the typed answer of a player and refresh the activity histogram.
    pub async fn handle_qrl_answer(&self, connection_id: &str, answer: String) {
        let mut inner = self.inner.lock().await;
        if inner.machine.status() != GameStatus::AskingQuestionQrl {
            debug!(room_id = %self.room_id, connection_id, "answer outside of a question");
            return;
        }
        if !inner.users.handle_qrl_answer(connection_id, answer, epoch_ms()) {
            return;
        }
        if let Some(question) = self.quiz.question(inner.question_index) {
            self.send_live_histogram(&inner, question);
        }
        self.send_host_stats(&inner);
    }

    /// Lock in the answer of a player, closing the question once everyone answered.
    pub async fn validate(&self, connection_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.machine.status().is_asking() {
            debug!(room_id = %self.room_id, connection_id, "validation outside of a question");
            return;
        }
        if !inner.users.validate(connection_id, epoch_ms()) {
            return;
        }
        self.send_host_stats(&inner);
        if inner.users.all_have_validated() {
            debug!(room_id = %self.room_id, "every player answered");
            self.timer.stop();
        }
    }

    /// Accelerate the countdown of the open question.
    pub async fn start_panicking(&self, connection_id: &str) -> bool {
        let inner = self.inner.lock().await;
        if !inner.users.is_host(connection_id) || self.timer.is_panicking() {
            return false;
        }
        let floor = match inner.machine.status() {
            GameStatus::AskingQuestionQcm => self.settings.qcm_panic_floor_s,
            GameStatus::AskingQuestionQrl => self.settings.qrl_panic_floor_s,
            _ => return false,
        };
        if self.timer.remaining() <= floor {
            debug!(room_id = %self.room_id, "too late to panic");
            return false;
        }
        self.timer.set_panic(true);
        self.gateway.send_panic_mode(&self.room_id);
        true
    }

    /// Pause or resume the countdown of the open question.
    pub async fn toggle_pause(&self, connection_id: &str) -> Option<bool> {
        let inner = self.inner.lock().await;
        if !inner.users.is_host(connection_id) || !inner.machine.status().is_asking() {
            return None;
        }
        let paused = self.timer.toggle()?;
        self.gateway.send_pause(&self.room_id, paused);
        Some(paused)
    }

    /// Host confirmation: start the game, skip the running countdown or move on from results.
    pub async fn confirm(self: &Arc<Self>, connection_id: &str) {
        if !self.is_host(connection_id).await {
            debug!(room_id = %self.room_id, connection_id, "confirm from a non-host ignored");
            return;
        }

        let Ok(gate) = Arc::clone(&self.transition_gate).try_lock_owned() else {
            // Countdowns are armed under the room lock.
            let _inner = self.inner.lock().await;
            if self.timer.is_running() {
                self.timer.stop();
            } else {
                debug!(room_id = %self.room_id, "skip deferred to the next countdown");
                self.skip_requested.store(true, Ordering::SeqCst);
            }
            return;
        };

        let inner = self.inner.lock().await;
        let step = match inner.machine.status() {
            GameStatus::Wait if inner.is_locked => Step::Start,
            GameStatus::Wait => {
                if let Some(host) = inner.users.host_id() {
                    self.gateway.send_alert(
                        Target::connection(&host),
                        "The room must be locked before starting the game",
                    );
                }
                return;
            }
            GameStatus::ShowResults | GameStatus::LastQuestion => Step::Advance,
            status => {
                debug!(room_id = %self.room_id, ?status, "confirm ignored");
                return;
            }
        };
        drop(inner);
        self.spawn_chain(gate, step);
    }

    /// Host grades of the open-ended answers.
    pub async fn handle_answers(self: &Arc<Self>, connection_id: &str, grades: Vec<QrlAnswer>) {
        let Ok(gate) = Arc::clone(&self.transition_gate).try_lock_owned() else {
            debug!(room_id = %self.room_id, "grades received during a transition");
            return;
        };
        {
            let inner = self.inner.lock().await;
            if !inner.users.is_host(connection_id)
                || inner.machine.status() != GameStatus::WaitingForAnswers
            {
                debug!(room_id = %self.room_id, connection_id, "grades ignored");
                return;
            }
        }
        self.spawn_chain(gate, Step::Grade(grades));
    }

    /// Stop every countdown and make any transition chain in flight exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.timer.stop();
    }

    /// Whether the room has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until no transition chain is in flight.
    pub async fn settled(&self) {
        let _gate = self.transition_gate.lock().await;
    }

    fn spawn_chain(self: &Arc<Self>, gate: OwnedMutexGuard<()>, step: Step) {
        let game = Arc::clone(self);
        tokio::spawn(async move {
            game.run_chain(step).await;
            game.skip_requested.store(false, Ordering::SeqCst);
            drop(gate);
        });
    }

    /// Arm a pause between two steps, ending it at once if the host already asked to skip.
    fn arm_delay(&self, seconds: u32) {
        self.timer.arm(seconds);
        if self.skip_requested.swap(false, Ordering::SeqCst) {
            debug!(room_id = %self.room_id, "pending skip applied");
            self.timer.stop();
        }
    }

    async fn run_chain(&self, mut step: Step) {
        loop {
            if self.is_closed() {
                debug!(room_id = %self.room_id, "room closed; transition chain exits");
                return;
            }
            let next = match step {
                Step::Start => self.start().await,
                Step::Ask => self.ask().await,
                Step::CloseQuestion => self.close_question().await,
                Step::Grade(grades) => self.grade(grades).await,
                Step::Results => self.results().await,
                Step::Advance => self.advance().await,
                Step::Finish => self.finish().await,
            };
            match next {
                Some(next) => step = next,
                None => return,
            }
        }
    }

    async fn start(&self) -> Option<Step> {
        {
            let mut inner = self.inner.lock().await;
            self.transition(&mut inner, GameEvent::Start)?;
            self.arm_delay(self.settings.starting_countdown_s);
        }
        self.timer.wait().await;
        Some(Step::Ask)
    }

    async fn ask(&self) -> Option<Step> {
        {
            let mut inner = self.inner.lock().await;
            let Some(question) = self.quiz.question(inner.question_index) else {
                warn!(room_id = %self.room_id, index = inner.question_index, "no question to ask");
                return None;
            };

            inner.users.reset_answers();
            self.transition(&mut inner, GameEvent::AskQuestion(question.kind))?;
            self.send_host_stats(&inner);
            self.send_live_histogram(&inner, question);

            let duration = match question.kind {
                QuestionType::Qcm => self.quiz.duration_s,
                QuestionType::Qrl => self.settings.qrl_duration_s,
            };
            // A skip aimed at the previous step never closes a fresh question.
            self.skip_requested.store(false, Ordering::SeqCst);
            self.timer.arm(duration);
            if inner.users.all_have_validated() {
                self.timer.stop();
            }
        }
        self.timer.wait().await;
        Some(Step::CloseQuestion)
    }

    async fn close_question(&self) -> Option<Step> {
        let mut inner = self.inner.lock().await;
        let question = self.quiz.question(inner.question_index)?;
        let now = epoch_ms();
        let activity = inner.users.qrl_activity(now);
        inner.qrl_activity = activity;
        inner.users.validate_remaining(now);

        match question.kind {
            QuestionType::Qcm => {
                inner
                    .users
                    .update_users_score(&question.correct_answers(), question.points);
                let histogram = HistogramData::Qcm {
                    text: question.text.clone(),
                    choices: inner.users.current_histogram_data(&question.choices),
                };
                inner.histograms.push(histogram);
                Some(Step::Results)
            }
            QuestionType::Qrl if self.kind == GameKind::Test => {
                Some(Step::Grade(inner.users.automatic_grades()))
            }
            QuestionType::Qrl => {
                self.transition(&mut inner, GameEvent::AwaitGrading)?;
                if let Some(host) = inner.users.host_id() {
                    self.gateway
                        .send_qrl_answers(&host, inner.users.qrl_answers());
                }
                None
            }
        }
    }

    async fn grade(&self, grades: Vec<QrlAnswer>) -> Option<Step> {
        let mut inner = self.inner.lock().await;
        let question = self.quiz.question(inner.question_index)?;

        let distribution = inner.users.grade_answers(&grades, question.points);
        self.gateway
            .send_qrl_result_data(Target::room(&self.room_id), inner.users.qrl_answers());

        let (active, inactive) = inner.qrl_activity;
        inner.histograms.push(HistogramData::Qrl {
            text: question.text.clone(),
            active,
            inactive,
            grades: distribution,
        });
        Some(Step::Results)
    }

    async fn results(&self) -> Option<Step> {
        let entry = {
            let mut inner = self.inner.lock().await;
            let last = self.quiz.is_last(inner.question_index);
            self.transition(&mut inner, GameEvent::ShowResults { last })?;
            self.send_host_stats(&inner);

            if self.kind.host_plays() {
                self.arm_delay(self.settings.confirm_delay_s);
            }

            (last && self.kind != GameKind::Test).then(|| HistoryEntry {
                name: self.quiz.title.clone(),
                date: completion_date(),
                number_players: inner.users.player_count(),
                best_score: inner.users.best_score(),
            })
        };

        if let Some(entry) = entry {
            if let Err(err) = self.history.add_history(entry).await {
                warn!(room_id = %self.room_id, error = %err, "failed to record game history");
            }
        }

        if !self.kind.host_plays() {
            return None;
        }
        self.timer.wait().await;
        Some(Step::Advance)
    }

    async fn advance(&self) -> Option<Step> {
        let mut inner = self.inner.lock().await;
        match inner.machine.status() {
            GameStatus::ShowResults => {
                inner.question_index += 1;
                Some(Step::Ask)
            }
            GameStatus::LastQuestion => Some(Step::Finish),
            status => {
                debug!(room_id = %self.room_id, ?status, "nothing to advance");
                None
            }
        }
    }

    async fn finish(&self) -> Option<Step> {
        let mut inner = self.inner.lock().await;
        inner.users.set_final_results();
        self.transition(&mut inner, GameEvent::Finish)?;

        let room = Target::room(&self.room_id);
        self.gateway
            .send_users_stat_update(room.clone(), inner.users.users_stat());
        self.gateway
            .send_histogram_history(room, inner.histograms.clone());
        None
    }

    /// Apply `event` and broadcast the new state.
    fn transition(&self, inner: &mut GameInner, event: GameEvent) -> Option<GameStatus> {
        match inner.machine.apply(event) {
            Ok(status) => {
                info!(room_id = %self.room_id, ?status, "room state changed");
                self.gateway
                    .send_state_update(&self.room_id, self.state_payload(inner));
                Some(status)
            }
            Err(err) => {
                warn!(room_id = %self.room_id, error = %err, "transition rejected");
                None
            }
        }
    }

    fn state_payload(&self, inner: &GameInner) -> GameStatePayload {
        let state = inner.machine.status();
        let question = self.quiz.question(inner.question_index);
        let payload = match state {
            GameStatus::Wait | GameStatus::ShowFinalResults => None,
            GameStatus::Starting => Some(StatePayload::Title(self.quiz.title.clone())),
            _ => question.map(|question| {
                let snapshot = if state.reveals_answer() {
                    QuestionSnapshot::from(question)
                } else {
                    QuestionSnapshot::from(&question.without_answer())
                };
                StatePayload::Question(snapshot)
            }),
        };
        GameStatePayload { state, payload }
    }

    fn joined(&self, inner: &GameInner, connection_id: &str) -> Option<JoinedGame> {
        let user = inner.users.get(connection_id)?;
        Some(JoinedGame {
            user: User {
                name: user.username.clone(),
                room_id: self.room_id.clone(),
                user_id: connection_id.to_string(),
            },
            title: self.quiz.title.clone(),
            game_state: self.state_payload(inner),
        })
    }

    fn send_host_stats(&self, inner: &GameInner) {
        if let Some(host) = inner.users.host_id() {
            self.gateway
                .send_users_stat_update(Target::connection(&host), inner.users.users_stat());
        }
    }

    fn send_live_histogram(&self, inner: &GameInner, question: &Question) {
        let Some(host) = inner.users.host_id() else {
            return;
        };
        let histogram = match question.kind {
            QuestionType::Qcm => HistogramData::Qcm {
                text: question.text.clone(),
                choices: inner.users.current_histogram_data(&question.choices),
            },
            QuestionType::Qrl => {
                let (active, inactive) = inner.users.qrl_activity(epoch_ms());
                HistogramData::Qrl {
                    text: question.text.clone(),
                    active,
                    inactive,
                    grades: Default::default(),
                }
            }
        };
        self.gateway
            .send_histogram_data_update(Target::connection(&host), histogram);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        dao::history::InMemoryHistory,
        dto::ws::ServerMessage,
        services::gateway::testing::RecordingGateway,
        state::{
            quiz::Choice,
            user::{Grade, UserState},
        },
    };

    const ROOM: &str = "1234";

    fn qcm(points: u32) -> Question {
        Question {
            text: "Capital of France?".into(),
            kind: QuestionType::Qcm,
            points,
            choices: vec![
                Choice {
                    text: "Paris".into(),
                    is_correct: true,
                },
                Choice {
                    text: "London".into(),
                    is_correct: false,
                },
            ],
        }
    }

    fn qrl(points: u32) -> Question {
        Question {
            text: "Why Paris?".into(),
            kind: QuestionType::Qrl,
            points,
            choices: vec![],
        }
    }

    fn quiz(questions: Vec<Question>) -> Quiz {
        Quiz {
            id: "capitals".into(),
            title: "Capitals".into(),
            duration_s: 20,
            questions,
        }
    }

    struct Fixture {
        game: Arc<ActiveGame>,
        gateway: Arc<RecordingGateway>,
        history: InMemoryHistory,
    }

    fn fixture(questions: Vec<Question>, kind: GameKind) -> Fixture {
        let gateway = Arc::new(RecordingGateway::default());
        let history = InMemoryHistory::new();
        let game = ActiveGame::new(
            ROOM,
            quiz(questions),
            kind,
            "h1",
            Arc::new(GameSettings::default()),
            gateway.clone(),
            Arc::new(history.clone()),
        );
        Fixture {
            game,
            gateway,
            history,
        }
    }

    async fn lobby_with_bob(questions: Vec<Question>) -> Fixture {
        let fixture = fixture(questions, GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();
        assert!(fixture.game.toggle_lock("h1", true).await);
        fixture
    }

    /// Confirm a locked lobby and let the starting countdown elapse.
    async fn start_game(fixture: &Fixture) {
        fixture.game.confirm("h1").await;
        sleep(Duration::from_millis(5_500)).await;
    }

    fn states(gateway: &RecordingGateway) -> Vec<GameStatus> {
        gateway
            .states(ROOM)
            .into_iter()
            .map(|state| state.state)
            .collect()
    }

    #[tokio::test]
    async fn join_rejects_duplicates_and_host_name() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();

        assert!(matches!(
            fixture.game.add_player("b2", "bob").await,
            Err(RoomError::UsernameTaken)
        ));
        assert!(matches!(
            fixture.game.add_player("b3", "organisateur").await,
            Err(RoomError::UsernameTaken)
        ));
        assert!(matches!(
            fixture.game.add_player("b4", "   ").await,
            Err(RoomError::EmptyUsername)
        ));
        assert_eq!(fixture.game.usernames().await, vec!["Organisateur", "Bob"]);
    }

    #[tokio::test]
    async fn connection_cannot_join_twice() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Alice").await.unwrap();

        assert!(matches!(
            fixture.game.add_player("h1", "Bob").await,
            Err(RoomError::AlreadyInRoom)
        ));
        assert!(matches!(
            fixture.game.add_player("b1", "Carol").await,
            Err(RoomError::AlreadyInRoom)
        ));
        assert!(fixture.game.is_host("h1").await);
        assert_eq!(fixture.game.usernames().await, vec!["Organisateur", "Alice"]);
    }

    #[tokio::test]
    async fn locked_room_rejects_players() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        assert!(matches!(
            fixture.game.add_player("c1", "Carol").await,
            Err(RoomError::RoomLocked)
        ));
    }

    #[tokio::test]
    async fn only_host_can_lock_and_only_in_lobby() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();
        assert!(!fixture.game.toggle_lock("b1", true).await);
        assert!(!fixture.game.is_locked().await);
    }

    #[tokio::test]
    async fn confirm_on_unlocked_lobby_alerts_host() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.confirm("h1").await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::Wait);
        assert!(
            fixture
                .gateway
                .sent_to(&Target::connection("h1"))
                .iter()
                .any(|message| matches!(message, ServerMessage::Alert(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirm_starts_with_title_then_sanitized_question() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        start_game(&fixture).await;

        let published = fixture.gateway.states(ROOM);
        assert_eq!(
            published[0],
            GameStatePayload {
                state: GameStatus::Starting,
                payload: Some(StatePayload::Title("Capitals".into())),
            }
        );
        assert_eq!(published[1].state, GameStatus::AskingQuestionQcm);
        match &published[1].payload {
            Some(StatePayload::Question(question)) => {
                assert!(question.choices.iter().all(|choice| !choice.is_correct));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sole_correct_answer_scores_with_bonus() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        start_game(&fixture).await;

        fixture.game.handle_choice("b1", vec![true, false]).await;
        fixture.game.validate("b1").await;
        fixture.game.settled().await;

        assert_eq!(
            fixture.game.score("b1").await,
            Some(Score {
                score: 48.0,
                bonus: true
            })
        );
        assert!(
            fixture
                .gateway
                .sent_to(&Target::connection("b1"))
                .contains(&ServerMessage::Score(Score {
                    score: 48.0,
                    bonus: true
                }))
        );
        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_scores_like_early_end() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        start_game(&fixture).await;

        fixture.game.handle_choice("b1", vec![true, false]).await;
        sleep(Duration::from_secs(21)).await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);
        assert_eq!(fixture.game.score("b1").await.unwrap().score, 48.0);
        assert!(fixture.game.is_validated("b1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn host_skip_closes_question() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        start_game(&fixture).await;

        fixture.game.confirm("h1").await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);
        assert_eq!(fixture.game.score("b1").await.unwrap().score, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn skip_between_steps_ends_next_pause() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        let gate = Arc::clone(&fixture.game.transition_gate)
            .try_lock_owned()
            .unwrap();

        fixture.game.confirm("h1").await;
        fixture.game.spawn_chain(gate, Step::Start);
        sleep(Duration::from_millis(100)).await;

        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQcm);
        assert!(fixture.game.timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_skip_does_not_close_next_question() {
        let fixture = fixture(vec![qcm(40), qcm(40)], GameKind::Random);
        fixture.game.add_player("b1", "Bob").await.unwrap();
        assert!(fixture.game.toggle_lock("h1", true).await);
        start_game(&fixture).await;
        fixture.game.validate("h1").await;
        fixture.game.validate("b1").await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);

        fixture.game.skip_requested.store(true, Ordering::SeqCst);
        sleep(Duration::from_millis(3_500)).await;

        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQcm);
        assert!(fixture.game.timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn full_game_records_history_and_final_results() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        start_game(&fixture).await;

        fixture.game.handle_choice("b1", vec![true, false]).await;
        fixture.game.validate("b1").await;
        fixture.game.settled().await;
        assert_eq!(fixture.game.status().await, GameStatus::LastQuestion);

        fixture.game.confirm("h1").await;
        fixture.game.settled().await;

        assert_eq!(
            states(&fixture.gateway),
            vec![
                GameStatus::Starting,
                GameStatus::AskingQuestionQcm,
                GameStatus::LastQuestion,
                GameStatus::ShowFinalResults,
            ]
        );
        let history = fixture.history.list_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "Capitals");
        assert_eq!(history[0].number_players, 1);
        assert_eq!(history[0].best_score, 48.0);

        let room = fixture.gateway.sent_to(&Target::room(ROOM));
        assert!(room.iter().any(|message| matches!(
            message,
            ServerMessage::HistogramHistory(histograms) if histograms.len() == 1
        )));
        assert!(room.iter().any(|message| matches!(
            message,
            ServerMessage::UsersStat(stats) if stats[0].state == UserState::FinalResults
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn open_ended_question_waits_for_grades() {
        let fixture = lobby_with_bob(vec![qrl(30), qcm(40)]).await;
        start_game(&fixture).await;
        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQrl);

        fixture
            .game
            .handle_qrl_answer("b1", "Because".into())
            .await;
        fixture.game.validate("b1").await;
        fixture.game.settled().await;
        assert_eq!(fixture.game.status().await, GameStatus::WaitingForAnswers);
        assert!(
            fixture
                .gateway
                .sent_to(&Target::connection("h1"))
                .iter()
                .any(|message| matches!(message, ServerMessage::QrlAnswers(answers) if answers.len() == 1))
        );

        fixture
            .game
            .handle_answers(
                "h1",
                vec![QrlAnswer {
                    username: "Bob".into(),
                    answer: String::new(),
                    grade: Grade::Half,
                }],
            )
            .await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);
        assert_eq!(fixture.game.score("b1").await.unwrap().score, 15.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_plays_itself_and_skips_history() {
        let fixture = fixture(vec![qcm(40), qrl(20)], GameKind::Test);
        assert!(fixture.game.is_locked().await);

        fixture.game.confirm("h1").await;
        sleep(Duration::from_millis(5_500)).await;
        fixture.game.handle_choice("h1", vec![true, false]).await;
        fixture.game.validate("h1").await;
        // Results delay, then the open-ended question.
        sleep(Duration::from_millis(3_500)).await;
        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQrl);
        fixture.game.handle_qrl_answer("h1", "Because".into()).await;
        fixture.game.validate("h1").await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::ShowFinalResults);
        assert_eq!(fixture.game.score("h1").await.unwrap().score, 68.0);
        assert!(fixture.history.list_history().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn panic_requires_enough_remaining_time() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        assert!(!fixture.game.start_panicking("h1").await);

        start_game(&fixture).await;
        assert!(!fixture.game.start_panicking("b1").await);
        assert!(fixture.game.start_panicking("h1").await);
        assert!(!fixture.game.start_panicking("h1").await);
        assert!(
            fixture
                .gateway
                .sent_to(&Target::room(ROOM))
                .contains(&ServerMessage::Panic)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_only_while_asking() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        assert_eq!(fixture.game.toggle_pause("h1").await, None);

        start_game(&fixture).await;
        assert_eq!(fixture.game.toggle_pause("h1").await, Some(true));
        sleep(Duration::from_secs(120)).await;
        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQcm);
        assert_eq!(fixture.game.toggle_pause("h1").await, Some(false));
    }

    #[tokio::test]
    async fn host_removal_closes_room() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();

        let departure = fixture.game.remove_user("h1").await.unwrap();
        assert!(departure.was_host);
        assert!(departure.close_room);
    }

    #[tokio::test]
    async fn player_leaving_lobby_keeps_room() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();

        let departure = fixture.game.remove_user("b1").await.unwrap();
        assert_eq!(departure.username, "Bob");
        assert!(!departure.close_room);
        assert!(fixture.game.remove_user("b1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn last_player_leaving_running_game_closes_room() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        start_game(&fixture).await;

        let departure = fixture.game.remove_user("b1").await.unwrap();
        assert!(departure.close_room);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_host_gets_stats_and_histograms() {
        let fixture = lobby_with_bob(vec![qcm(40), qcm(40)]).await;
        fixture.game.mark_disconnected("h1").await;

        assert!(fixture.game.update("h1", "h2").await);

        let sent = fixture.gateway.sent_to(&Target::connection("h2"));
        assert!(sent.iter().any(|message| matches!(message, ServerMessage::UsersStat(_))));
        assert!(
            sent.iter()
                .any(|message| matches!(message, ServerMessage::HistogramHistory(_)))
        );
        assert!(fixture.game.is_host("h2").await);
        assert!(!fixture.game.update("h1", "h3").await);
    }

    #[tokio::test]
    async fn rejoin_requires_matching_username() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();

        assert!(matches!(
            fixture.game.rejoin("b1", "b2", "Alice").await,
            Err(RoomError::RejoinRefused)
        ));
        let joined = fixture.game.rejoin("b1", "b2", "Bob").await.unwrap();
        assert_eq!(joined.user.user_id, "b2");
        assert!(fixture.game.has_member("b2").await);
    }

    #[tokio::test]
    async fn ban_requires_host() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();
        fixture.game.add_player("c1", "Carol").await.unwrap();

        assert!(matches!(
            fixture.game.ban("c1", "Bob").await,
            Err(RoomError::NotHost)
        ));
        assert_eq!(
            fixture.game.ban("h1", "bob").await.unwrap(),
            Some(Eviction {
                connection_id: "b1".into(),
                close_room: false,
            })
        );
        assert!(matches!(
            fixture.game.add_player("b2", "BOB").await,
            Err(RoomError::UsernameBanned)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn banning_last_pending_player_ends_question() {
        let fixture = fixture(vec![qcm(40), qcm(40)], GameKind::Standard);
        fixture.game.add_player("a1", "Alice").await.unwrap();
        fixture.game.add_player("b1", "Bob").await.unwrap();
        assert!(fixture.game.toggle_lock("h1", true).await);
        start_game(&fixture).await;

        fixture.game.handle_choice("a1", vec![true, false]).await;
        fixture.game.validate("a1").await;
        let eviction = fixture.game.ban("h1", "Bob").await.unwrap();
        assert_eq!(eviction.map(|eviction| eviction.close_room), Some(false));
        sleep(Duration::from_secs(2)).await;
        fixture.game.settled().await;

        assert_eq!(fixture.game.status().await, GameStatus::ShowResults);
        assert_eq!(fixture.game.score("a1").await.unwrap().score, 48.0);
    }

    #[tokio::test]
    async fn chat_permission_is_pushed_to_player() {
        let fixture = fixture(vec![qcm(40)], GameKind::Standard);
        fixture.game.add_player("b1", "Bob").await.unwrap();

        assert!(fixture.game.set_chat("h1", "Bob", false).await);
        assert!(!fixture.game.set_chat("b1", "Bob", true).await);
        assert!(
            fixture
                .gateway
                .sent_to(&Target::connection("b1"))
                .contains(&ServerMessage::ChatPermission(false))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_running_chain() {
        let fixture = lobby_with_bob(vec![qcm(40)]).await;
        start_game(&fixture).await;

        fixture.game.close();
        fixture.game.settled().await;

        assert!(fixture.game.is_closed());
        assert_eq!(fixture.game.status().await, GameStatus::AskingQuestionQcm);
    }
}

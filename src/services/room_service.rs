//! Directory of the live rooms: creation, membership, reconnection and teardown.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use rand::{Rng, seq::SliceRandom};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    config::GameSettings,
    dao::{history::HistoryStore, question_bank::QuestionBank},
    dto::game::{JoinedGame, QrlAnswer, RoomSummary, Score, User, UserConnectionUpdate},
    error::RoomError,
    services::{chat::ChatHook, gateway::Gateway},
    state::{
        game::{ActiveGame, GameKind},
        quiz::Quiz,
    },
};

/// Reason sent to a banned connection.
const BANNED_REASON: &str = "You have been banned from the room";

/// Top-level room directory shared by every connection.
pub struct RoomManagementService {
    settings: Arc<GameSettings>,
    gateway: Arc<dyn Gateway>,
    question_bank: Arc<dyn QuestionBank>,
    history: Arc<dyn HistoryStore>,
    chat: Arc<dyn ChatHook>,
    rooms: DashMap<String, Arc<ActiveGame>>,
    /// Connection identifier to room identifier.
    memberships: DashMap<String, String>,
    /// Grace-period removals waiting to fire, keyed by connection identifier.
    pending_removals: DashMap<String, JoinHandle<()>>,
}

impl RoomManagementService {
    /// Create an empty directory wired to its collaborators.
    pub fn new(
        settings: GameSettings,
        gateway: Arc<dyn Gateway>,
        question_bank: Arc<dyn QuestionBank>,
        history: Arc<dyn HistoryStore>,
        chat: Arc<dyn ChatHook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings: Arc::new(settings),
            gateway,
            question_bank,
            history,
            chat,
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            pending_removals: DashMap::new(),
        })
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Open a room for the stored quiz `quiz_id`, hosted by `connection_id`.
    pub async fn create_game(
        &self,
        connection_id: &str,
        quiz_id: &str,
    ) -> Result<JoinedGame, RoomError> {
        let quiz = self.find_quiz(quiz_id).await?;
        self.open_room(connection_id, quiz, GameKind::Standard, "")
            .await
    }

    /// Open a room with questions drawn at random from the bank; the host plays along.
    pub async fn create_random_game(&self, connection_id: &str) -> Result<JoinedGame, RoomError> {
        let mut questions = self.question_bank.get_all_qcm_questions().await?;
        let required = self.settings.random_min_questions;
        if questions.len() < required {
            return Err(RoomError::NotEnoughQuestions {
                available: questions.len(),
                required,
            });
        }

        questions.shuffle(&mut rand::rng());
        questions.truncate(self.settings.random_question_count);

        let quiz = Quiz {
            id: String::new(),
            title: self.settings.random_title.clone(),
            duration_s: self.settings.random_duration_s,
            questions,
        };
        self.open_room(connection_id, quiz, GameKind::Random, "")
            .await
    }

    /// Open a solo practice run of the stored quiz `quiz_id`.
    pub async fn test_game(
        &self,
        connection_id: &str,
        quiz_id: &str,
    ) -> Result<JoinedGame, RoomError> {
        let quiz = self.find_quiz(quiz_id).await?;
        let prefix = self.settings.test_room_prefix.clone();
        self.open_room(connection_id, quiz, GameKind::Test, &prefix)
            .await
    }

    async fn find_quiz(&self, quiz_id: &str) -> Result<Quiz, RoomError> {
        self.question_bank
            .find_quiz(quiz_id)
            .await?
            .ok_or_else(|| RoomError::QuizNotFound(quiz_id.to_string()))
    }

    async fn open_room(
        &self,
        connection_id: &str,
        quiz: Quiz,
        kind: GameKind,
        prefix: &str,
    ) -> Result<JoinedGame, RoomError> {
        if self.memberships.contains_key(connection_id) {
            self.leave_room(connection_id).await;
        }

        let game = self.allocate_room(connection_id, quiz, kind, prefix)?;
        let room_id = game.room_id().to_string();
        self.memberships
            .insert(connection_id.to_string(), room_id.clone());
        self.gateway.join_group(connection_id, &room_id);
        info!(room_id = %room_id, connection_id, ?kind, title = %game.title(), "room created");

        game.snapshot_for(connection_id)
            .await
            .ok_or(RoomError::RoomNotFound)
    }

    /// Insert a new game under a random free room code.
    fn allocate_room(
        &self,
        connection_id: &str,
        quiz: Quiz,
        kind: GameKind,
        prefix: &str,
    ) -> Result<Arc<ActiveGame>, RoomError> {
        let min = self.settings.room_code_min;
        let max = self.settings.room_code_max.max(min);
        let span = max - min + 1;
        let start = rand::rng().random_range(0..span);

        for offset in 0..span {
            let code = min + (start + offset) % span;
            let room_id = format!("{prefix}{code}");
            if let Entry::Vacant(entry) = self.rooms.entry(room_id.clone()) {
                let game = ActiveGame::new(
                    room_id,
                    quiz,
                    kind,
                    connection_id,
                    Arc::clone(&self.settings),
                    Arc::clone(&self.gateway),
                    Arc::clone(&self.history),
                );
                entry.insert(Arc::clone(&game));
                return Ok(game);
            }
        }

        warn!(min, max, "every room code is in use");
        Err(RoomError::NoRoomAvailable)
    }

    /// Register `username` in `room_id` under `connection_id`.
    pub async fn join_room(
        &self,
        connection_id: &str,
        room_id: &str,
        username: &str,
    ) -> Result<JoinedGame, RoomError> {
        if room_id.starts_with(&self.settings.test_room_prefix) {
            return Err(RoomError::RoomNotFound);
        }
        let game = self.room(room_id).ok_or(RoomError::RoomNotFound)?;

        if self
            .memberships
            .get(connection_id)
            .is_some_and(|current| current.value() != room_id)
        {
            self.leave_room(connection_id).await;
        }

        let joined = game.add_player(connection_id, username).await?;
        self.memberships
            .insert(connection_id.to_string(), room_id.to_string());
        self.gateway.join_group(connection_id, room_id);
        Ok(joined)
    }

    /// Reconnect the participant described by `user` on `new_id`, cancelling its pending
    /// removal.
    pub async fn rejoin_room(&self, user: &User, new_id: &str) -> Result<JoinedGame, RoomError> {
        let game = self.room(&user.room_id).ok_or(RoomError::RoomNotFound)?;
        let old_id = user.user_id.as_str();

        let member_of_room = self
            .memberships
            .get(old_id)
            .is_some_and(|room| room.value() == &user.room_id);
        if !member_of_room {
            return Err(RoomError::RejoinRefused);
        }

        let joined = game.rejoin(old_id, new_id, &user.name).await?;

        if let Some((_, handle)) = self.pending_removals.remove(old_id) {
            handle.abort();
            debug!(connection_id = old_id, "pending removal cancelled");
        }
        self.memberships.remove(old_id);
        self.memberships
            .insert(new_id.to_string(), user.room_id.clone());
        self.gateway.leave_group(old_id, &user.room_id);
        self.gateway.join_group(new_id, &user.room_id);
        Ok(joined)
    }

    /// Transport-level disconnect: flag the participant and remove them once the grace period
    /// expires without a rejoin.
    pub async fn leave_user(self: &Arc<Self>, connection_id: &str) {
        let Some(game) = self.game_of(connection_id) else {
            return;
        };
        game.mark_disconnected(connection_id).await;

        let service = Arc::clone(self);
        let id = connection_id.to_string();
        let grace = self.settings.grace_period();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            service.pending_removals.remove(&id);
            debug!(connection_id = %id, "grace period expired");
            service.perform_user_removal(&id).await;
        });

        if let Some(previous) = self
            .pending_removals
            .insert(connection_id.to_string(), handle)
        {
            previous.abort();
        }
    }

    /// Explicit leave: remove the participant immediately.
    pub async fn leave_room(&self, connection_id: &str) {
        if let Some((_, handle)) = self.pending_removals.remove(connection_id) {
            handle.abort();
        }
        self.perform_user_removal(connection_id).await;
    }

    /// Remove a participant, tearing the room down when it has no reason to live anymore.
    pub async fn perform_user_removal(&self, connection_id: &str) {
        let Some((_, room_id)) = self.memberships.remove(connection_id) else {
            debug!(connection_id, "removal of an unknown connection");
            return;
        };
        self.gateway.leave_group(connection_id, &room_id);
        let Some(game) = self.room(&room_id) else {
            return;
        };
        let Some(departure) = game.remove_user(connection_id).await else {
            return;
        };

        if departure.close_room {
            self.teardown(&room_id);
        } else {
            self.chat
                .send_system_message(&room_id, &format!("{} left the room", departure.username));
        }
    }

    /// Close a room: notify its members and forget every trace of it.
    pub fn teardown(&self, room_id: &str) {
        let Some((_, game)) = self.rooms.remove(room_id) else {
            return;
        };
        game.close();
        self.gateway.send_delete_room(room_id);

        let members: Vec<String> = self
            .memberships
            .iter()
            .filter(|entry| entry.value() == room_id)
            .map(|entry| entry.key().clone())
            .collect();
        for member in members {
            self.memberships.remove(&member);
            if let Some((_, handle)) = self.pending_removals.remove(&member) {
                handle.abort();
            }
        }

        self.gateway.close_group(room_id);
        self.chat.delete_room(room_id);
        info!(room_id, "room closed");
    }

    /// Ban `username` from the room of the host `by`.
    pub async fn ban_user(&self, by: &str, username: &str) -> Result<(), RoomError> {
        let room_id = self.get_room_id(by).ok_or(RoomError::RoomNotFound)?;
        let game = self.room(&room_id).ok_or(RoomError::RoomNotFound)?;

        let Some(eviction) = game.ban(by, username).await? else {
            debug!(room_id = %room_id, username, "nobody to ban");
            return Ok(());
        };

        let evicted = eviction.connection_id.as_str();
        if let Some((_, handle)) = self.pending_removals.remove(evicted) {
            handle.abort();
        }
        self.memberships.remove(evicted);
        self.gateway.send_user_removal(evicted, BANNED_REASON);
        self.gateway.leave_group(evicted, &room_id);

        if eviction.close_room {
            self.teardown(&room_id);
            return Ok(());
        }
        self.gateway.send_user_connection_update(
            &room_id,
            UserConnectionUpdate {
                is_connected: false,
                username: username.to_string(),
            },
        );
        self.chat
            .send_system_message(&room_id, &format!("{username} has been banned"));
        Ok(())
    }

    /// Score of a participant.
    pub async fn get_score(&self, connection_id: &str) -> Option<Score> {
        self.game_of(connection_id)?.score(connection_id).await
    }

    /// Current selection of a participant.
    pub async fn get_choice(&self, connection_id: &str) -> Option<Vec<bool>> {
        self.game_of(connection_id)?.choice(connection_id).await
    }

    /// Usernames of the room `connection_id` belongs to, in join order.
    pub async fn get_users(&self, connection_id: &str) -> Vec<String> {
        match self.game_of(connection_id) {
            Some(game) => game.usernames().await,
            None => Vec::new(),
        }
    }

    /// Room of a connection.
    pub fn get_room_id(&self, connection_id: &str) -> Option<String> {
        self.memberships
            .get(connection_id)
            .map(|room| room.value().clone())
    }

    /// Whether a participant has locked in their answer.
    pub async fn is_validate(&self, connection_id: &str) -> bool {
        match self.game_of(connection_id) {
            Some(game) => game.is_validated(connection_id).await,
            None => false,
        }
    }

    /// Public view of a live room.
    pub async fn room_summary(&self, room_id: &str) -> Result<RoomSummary, RoomError> {
        let game = self.room(room_id).ok_or(RoomError::RoomNotFound)?;
        Ok(RoomSummary {
            room_id: room_id.to_string(),
            title: game.title().to_string(),
            state: game.status().await,
            is_locked: game.is_locked().await,
            participants: game.participant_count().await,
        })
    }

    /// Forward a selection.
    pub async fn handle_choice(&self, connection_id: &str, choices: Vec<bool>) {
        if let Some(game) = self.game_of(connection_id) {
            game.handle_choice(connection_id, choices).await;
        }
    }

    /// Forward an answer validation.
    pub async fn validate(&self, connection_id: &str) {
        if let Some(game) = self.game_of(connection_id) {
            game.validate(connection_id).await;
        }
    }

    /// Forward a host confirmation.
    pub async fn confirm(&self, connection_id: &str) {
        if let Some(game) = self.game_of(connection_id) {
            game.confirm(connection_id).await;
        }
    }

    /// Forward a lobby lock change.
    pub async fn toggle_lock(&self, connection_id: &str, locked: bool) {
        if let Some(game) = self.game_of(connection_id) {
            game.toggle_lock(connection_id, locked).await;
        }
    }

    /// Forward a panic request.
    pub async fn start_panicking(&self, connection_id: &str) {
        if let Some(game) = self.game_of(connection_id) {
            game.start_panicking(connection_id).await;
        }
    }

    /// Forward a pause request.
    pub async fn toggle_pause(&self, connection_id: &str) {
        if let Some(game) = self.game_of(connection_id) {
            game.toggle_pause(connection_id).await;
        }
    }

    /// Forward a chat permission change.
    pub async fn set_chat(&self, connection_id: &str, username: &str, value: bool) {
        if let Some(game) = self.game_of(connection_id) {
            game.set_chat(connection_id, username, value).await;
        }
    }

    /// Forward the host grades.
    pub async fn handle_answers(&self, connection_id: &str, grades: Vec<QrlAnswer>) {
        if let Some(game) = self.game_of(connection_id) {
            game.handle_answers(connection_id, grades).await;
        }
    }

    /// Forward a typed open-ended answer.
    pub async fn handle_qrl_answer(&self, connection_id: &str, answer: String) {
        if let Some(game) = self.game_of(connection_id) {
            game.handle_qrl_answer(connection_id, answer).await;
        }
    }

    fn room(&self, room_id: &str) -> Option<Arc<ActiveGame>> {
        self.rooms.get(room_id).map(|game| Arc::clone(game.value()))
    }

    fn game_of(&self, connection_id: &str) -> Option<Arc<ActiveGame>> {
        let room_id = self.get_room_id(connection_id);
        match room_id {
            Some(room_id) => self.room(&room_id),
            None => {
                debug!(connection_id, "event from a connection outside any room");
                None
            }
        }
    }
}

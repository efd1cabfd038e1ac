//! Outbound side of the transport: the emit surface the room core talks to, and its WebSocket
//! implementation with room-based multicast.

use std::collections::HashSet;

use axum::extract::ws::Message;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dto::{
    game::{
        GameStatePayload, HistogramData, QrlAnswer, QrlGradedAnswer, Score, UserConnectionUpdate,
        UserGameInfo, UserStat,
    },
    ws::{ServerMessage, SystemMessage},
};

/// Recipient of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// Every connection registered in the room group.
    Room(String),
    /// A single connection.
    Connection(String),
}

impl Target {
    /// Address a whole room.
    pub fn room(room_id: &str) -> Self {
        Target::Room(room_id.to_string())
    }

    /// Address one connection.
    pub fn connection(connection_id: &str) -> Self {
        Target::Connection(connection_id.to_string())
    }
}

/// Narrow emit surface used by the room core. Implementations are pure sinks: delivery failures
/// are never reported back.
pub trait Gateway: Send + Sync {
    /// Deliver `message` to `target`.
    fn emit(&self, target: Target, message: ServerMessage);
    /// Add a connection to a room multicast group.
    fn join_group(&self, connection_id: &str, room_id: &str);
    /// Remove a connection from a room multicast group.
    fn leave_group(&self, connection_id: &str, room_id: &str);
    /// Drop a room multicast group entirely.
    fn close_group(&self, room_id: &str);

    /// Broadcast the room state.
    fn send_state_update(&self, room_id: &str, state: GameStatePayload) {
        self.emit(Target::room(room_id), ServerMessage::State(state));
    }

    /// Notify a player of their score.
    fn send_score_update(&self, connection_id: &str, score: Score) {
        self.emit(Target::connection(connection_id), ServerMessage::Score(score));
    }

    /// Push the player list.
    fn send_users_stat_update(&self, target: Target, stats: Vec<UserStat>) {
        self.emit(target, ServerMessage::UsersStat(stats));
    }

    /// Push the live distribution of the open question.
    fn send_histogram_data_update(&self, target: Target, histogram: HistogramData) {
        self.emit(target, ServerMessage::Histogram(histogram));
    }

    /// Push the distribution of every question asked so far.
    fn send_histogram_history(&self, target: Target, histograms: Vec<HistogramData>) {
        self.emit(target, ServerMessage::HistogramHistory(histograms));
    }

    /// Tell a connection it has been evicted from its room.
    fn send_user_removal(&self, connection_id: &str, reason: &str) {
        self.emit(
            Target::connection(connection_id),
            ServerMessage::Removed(reason.to_string()),
        );
    }

    /// Tell every member that the room is closed.
    fn send_delete_room(&self, room_id: &str) {
        self.emit(Target::room(room_id), ServerMessage::DeleteRoom);
    }

    /// Show an alert.
    fn send_alert(&self, target: Target, text: &str) {
        self.emit(target, ServerMessage::Alert(text.to_string()));
    }

    /// Restore a player's answer state.
    fn send_user_game_info(&self, connection_id: &str, info: UserGameInfo) {
        self.emit(
            Target::connection(connection_id),
            ServerMessage::UserGameInfo(info),
        );
    }

    /// Announce a participant (dis)connection.
    fn send_user_connection_update(&self, room_id: &str, update: UserConnectionUpdate) {
        self.emit(Target::room(room_id), ServerMessage::UserConnection(update));
    }

    /// Tell a player how their open-ended answer was graded.
    fn send_qrl_graded_answer(&self, connection_id: &str, graded: QrlGradedAnswer) {
        self.emit(
            Target::connection(connection_id),
            ServerMessage::QrlGraded(graded),
        );
    }

    /// Publish the graded open-ended answers.
    fn send_qrl_result_data(&self, target: Target, answers: Vec<QrlAnswer>) {
        self.emit(target, ServerMessage::QrlResult(answers));
    }

    /// Hand the open-ended answers to the host for grading.
    fn send_qrl_answers(&self, connection_id: &str, answers: Vec<QrlAnswer>) {
        self.emit(
            Target::connection(connection_id),
            ServerMessage::QrlAnswers(answers),
        );
    }

    /// Broadcast the remaining seconds of the countdown.
    fn send_timer_update(&self, room_id: &str, remaining: u32) {
        self.emit(Target::room(room_id), ServerMessage::Timer(remaining));
    }

    /// Announce panic mode.
    fn send_panic_mode(&self, room_id: &str) {
        self.emit(Target::room(room_id), ServerMessage::Panic);
    }

    /// Announce a countdown pause (`true`) or resume.
    fn send_pause(&self, room_id: &str, paused: bool) {
        self.emit(Target::room(room_id), ServerMessage::Pause(paused));
    }

    /// Tell a player whether they may chat.
    fn send_chat_permission(&self, connection_id: &str, can_chat: bool) {
        self.emit(
            Target::connection(connection_id),
            ServerMessage::ChatPermission(can_chat),
        );
    }

    /// Broadcast a server-authored chat line.
    fn send_system_message(&self, room_id: &str, text: &str) {
        self.emit(
            Target::room(room_id),
            ServerMessage::SystemMessage(SystemMessage {
                room_id: room_id.to_string(),
                text: text.to_string(),
            }),
        );
    }
}

/// [`Gateway`] backed by the writer channels of the open WebSocket connections.
#[derive(Default)]
pub struct WebSocketGateway {
    connections: DashMap<String, mpsc::UnboundedSender<Message>>,
    groups: DashMap<String, HashSet<String>>,
}

impl WebSocketGateway {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writer channel of a freshly opened socket.
    pub fn register(&self, connection_id: &str, tx: mpsc::UnboundedSender<Message>) {
        self.connections.insert(connection_id.to_string(), tx);
    }

    /// Forget a closed socket. Group membership is left to the room directory.
    pub fn unregister(&self, connection_id: &str) {
        self.connections.remove(connection_id);
    }

    /// Number of open sockets.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn send_to(&self, connection_id: &str, message: &ServerMessage) {
        let Some(tx) = self
            .connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
        else {
            debug!(connection_id, "dropping message for unknown connection");
            return;
        };

        if send_message_to_websocket(&tx, message).is_err() {
            debug!(connection_id, "writer closed; dropping connection");
            self.connections.remove(connection_id);
        }
    }
}

impl Gateway for WebSocketGateway {
    fn emit(&self, target: Target, message: ServerMessage) {
        match target {
            Target::Connection(connection_id) => self.send_to(&connection_id, &message),
            Target::Room(room_id) => {
                let members: Vec<String> = self
                    .groups
                    .get(&room_id)
                    .map(|group| group.iter().cloned().collect())
                    .unwrap_or_default();
                for member in members {
                    self.send_to(&member, &message);
                }
            }
        }
    }

    fn join_group(&self, connection_id: &str, room_id: &str) {
        self.groups
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    fn leave_group(&self, connection_id: &str, room_id: &str) {
        if let Some(mut group) = self.groups.get_mut(room_id) {
            group.remove(connection_id);
        }
    }

    fn close_group(&self, room_id: &str) {
        self.groups.remove(room_id);
    }
}

/// Writer channel of a socket has been dropped.
#[derive(Debug, Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

/// Serialize a payload and push it onto the provided WebSocket sender.
///
/// Serialization failures are logged and swallowed; `Err` means the writer channel is closed.
pub fn send_message_to_websocket<T>(
    tx: &mpsc::UnboundedSender<Message>,
    value: &T,
) -> Result<(), ConnectionClosed>
where
    T: ?Sized + serde::Serialize + std::fmt::Debug,
{
    let payload = match serde_json::to_string(value) {
        Ok(p) => p,
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
            return Ok(());
        }
    };

    tx.send(Message::Text(payload.into()))
        .map_err(|_| ConnectionClosed)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_messages_reach_every_group_member() {
        let gateway = WebSocketGateway::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        gateway.register("a", tx_a);
        gateway.register("b", tx_b);
        gateway.register("c", tx_c);
        gateway.join_group("a", "1234");
        gateway.join_group("b", "1234");

        gateway.send_delete_room("1234");

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn closed_writer_is_forgotten() {
        let gateway = WebSocketGateway::new();
        let (tx, rx) = mpsc::unbounded_channel();
        gateway.register("a", tx);
        drop(rx);

        gateway.send_alert(Target::connection("a"), "hello");
        assert_eq!(gateway.connection_count(), 0);
    }

    #[test]
    fn left_member_no_longer_receives_room_messages() {
        let gateway = WebSocketGateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("a", tx);
        gateway.join_group("a", "1234");
        gateway.leave_group("a", "1234");

        gateway.send_timer_update("1234", 3);
        assert!(rx.try_recv().is_err());
    }
}

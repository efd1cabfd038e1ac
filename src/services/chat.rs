//! Hooks into the room chat used by the orchestration core.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::services::gateway::Gateway;

/// The part of the chat subsystem the room core needs.
pub trait ChatHook: Send + Sync {
    /// Post a server-authored line in the room chat.
    fn send_system_message(&self, room_id: &str, text: &str);
    /// Forget everything about a closed room.
    fn delete_room(&self, room_id: &str);
}

/// [`ChatHook`] broadcasting system lines through the gateway and keeping them as backlog.
pub struct GatewayChat {
    gateway: Arc<dyn Gateway>,
    backlog: DashMap<String, Vec<String>>,
}

impl GatewayChat {
    /// Create a chat hook on top of `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            backlog: DashMap::new(),
        }
    }

    /// System lines posted in `room_id` so far.
    pub fn backlog(&self, room_id: &str) -> Vec<String> {
        self.backlog
            .get(room_id)
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl ChatHook for GatewayChat {
    fn send_system_message(&self, room_id: &str, text: &str) {
        self.backlog
            .entry(room_id.to_string())
            .or_default()
            .push(text.to_string());
        self.gateway.send_system_message(room_id, text);
    }

    fn delete_room(&self, room_id: &str) {
        if self.backlog.remove(room_id).is_some() {
            debug!(room_id, "chat backlog dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dto::ws::{ServerMessage, SystemMessage},
        services::gateway::{Target, testing::RecordingGateway},
    };

    #[test]
    fn system_lines_are_broadcast_and_kept_until_deletion() {
        let gateway = Arc::new(RecordingGateway::default());
        let chat = GatewayChat::new(gateway.clone());

        chat.send_system_message("1234", "Bob left the room");

        assert_eq!(
            gateway.sent_to(&Target::room("1234")),
            vec![ServerMessage::SystemMessage(SystemMessage {
                room_id: "1234".into(),
                text: "Bob left the room".into(),
            })]
        );
        assert_eq!(chat.backlog("1234"), vec!["Bob left the room"]);

        chat.delete_room("1234");
        assert!(chat.backlog("1234").is_empty());
    }
}

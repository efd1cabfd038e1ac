pub mod game;
pub mod quiz;
pub mod state_machine;
pub mod timer;
pub mod user;
pub mod users;

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    config::AppConfig,
    dao::{history::HistoryStore, question_bank::QuestionBank},
    services::{
        chat::GatewayChat, gateway::WebSocketGateway, room_service::RoomManagementService,
    },
};

pub type SharedState = Arc<AppState>;

/// Central application state: the socket registry and the room directory.
pub struct AppState {
    config: AppConfig,
    gateway: Arc<WebSocketGateway>,
    rooms: Arc<RoomManagementService>,
    history: Arc<dyn HistoryStore>,
}

impl AppState {
    /// Wire the room directory to the WebSocket gateway and the storage collaborators.
    pub fn new(
        config: AppConfig,
        question_bank: Arc<dyn QuestionBank>,
        history: Arc<dyn HistoryStore>,
    ) -> SharedState {
        let gateway = Arc::new(WebSocketGateway::new());
        let chat = Arc::new(GatewayChat::new(gateway.clone()));
        let rooms = RoomManagementService::new(
            config.game().clone(),
            gateway.clone(),
            question_bank,
            Arc::clone(&history),
            chat,
        );

        Arc::new(Self {
            config,
            gateway,
            rooms,
            history,
        })
    }

    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registry of the open sockets.
    pub fn gateway(&self) -> &Arc<WebSocketGateway> {
        &self.gateway
    }

    /// Directory of the live rooms.
    pub fn rooms(&self) -> &Arc<RoomManagementService> {
        &self.rooms
    }

    /// Completed games.
    pub fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

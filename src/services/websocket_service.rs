use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::ws::{Ack, ClientMessage, ServerMessage},
    error::RoomError,
    services::gateway::{ConnectionClosed, send_message_to_websocket},
    state::SharedState,
};

/// Handle the full lifecycle of a quiz client WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4().to_string();
    state
        .gateway()
        .register(&connection_id, outbound_tx.clone());
    info!(connection_id = %connection_id, "client connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(connection_id = %connection_id, payload = %text, "received client message");

                match ClientMessage::from_json_str(&text) {
                    Ok(msg) => {
                        if dispatch(&state, &connection_id, &outbound_tx, msg)
                            .await
                            .is_err()
                        {
                            info!(connection_id = %connection_id, "connection closed while answering, terminating");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(connection_id = %connection_id, error = %err, "failed to parse client message");
                    }
                }
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(connection_id = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.gateway().unregister(&connection_id);
    state.rooms().leave_user(&connection_id).await;
    info!(connection_id = %connection_id, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Route one inbound event to the room directory.
///
/// `Err` means the writer channel is closed and the connection should be terminated.
async fn dispatch(
    state: &SharedState,
    connection_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    message: ClientMessage,
) -> Result<(), ConnectionClosed> {
    let rooms = state.rooms();
    match message {
        ClientMessage::Create(quiz_id) => {
            let result = rooms.create_game(connection_id, &quiz_id).await;
            send_ack(tx, "game:create", result)
        }
        ClientMessage::CreateRandom => {
            let result = rooms.create_random_game(connection_id).await;
            send_ack(tx, "game:create-random", result)
        }
        ClientMessage::CreateTest(quiz_id) => {
            let result = rooms.test_game(connection_id, &quiz_id).await;
            send_ack(tx, "game:create-test", result)
        }
        ClientMessage::Join(request) => {
            let result = match request.validate() {
                Ok(()) => {
                    rooms
                        .join_room(connection_id, &request.game_code, &request.username)
                        .await
                }
                Err(errors) => Err(RoomError::InvalidRequest(errors.to_string())),
            };
            send_ack(tx, "game:join", result)
        }
        ClientMessage::Rejoin(user) => {
            let result = rooms.rejoin_room(&user, connection_id).await;
            send_ack(tx, "game:rejoin", result)
        }
        ClientMessage::Ban(username) => {
            let result = rooms.ban_user(connection_id, &username).await;
            send_ack(tx, "game:ban", result)
        }
        ClientMessage::Leave => {
            rooms.leave_room(connection_id).await;
            Ok(())
        }
        ClientMessage::Choice(choices) => {
            rooms.handle_choice(connection_id, choices).await;
            Ok(())
        }
        ClientMessage::Validate => {
            rooms.validate(connection_id).await;
            Ok(())
        }
        ClientMessage::Confirm => {
            rooms.confirm(connection_id).await;
            Ok(())
        }
        ClientMessage::Toggle(locked) => {
            rooms.toggle_lock(connection_id, locked).await;
            Ok(())
        }
        ClientMessage::Panic => {
            rooms.start_panicking(connection_id).await;
            Ok(())
        }
        ClientMessage::Pause => {
            rooms.toggle_pause(connection_id).await;
            Ok(())
        }
        ClientMessage::SetChat(request) => {
            rooms
                .set_chat(connection_id, &request.username, request.value)
                .await;
            Ok(())
        }
        ClientMessage::Answers(grades) => {
            rooms.handle_answers(connection_id, grades).await;
            Ok(())
        }
        ClientMessage::QrlAnswer(answer) => {
            rooms.handle_qrl_answer(connection_id, answer).await;
            Ok(())
        }
    }
}

fn send_ack<T: Serialize>(
    tx: &mpsc::UnboundedSender<Message>,
    event: &str,
    result: Result<T, RoomError>,
) -> Result<(), ConnectionClosed> {
    if let Err(err) = &result {
        debug!(event, error = %err, "request refused");
    }
    send_message_to_websocket(tx, &ServerMessage::Ack(Ack::from_result(event, result)))
}

async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}

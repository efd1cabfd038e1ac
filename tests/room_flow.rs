use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use quizroom_back::{
    config::GameSettings,
    dao::{history::InMemoryHistory, question_bank::JsonQuestionBank},
    dto::{
        game::{Score, StatePayload, User},
        ws::ServerMessage,
    },
    error::RoomError,
    services::{
        chat::GatewayChat,
        gateway::{Gateway, Target},
        room_service::RoomManagementService,
    },
    state::{
        quiz::{Choice, Question, QuestionType, Quiz},
        state_machine::GameStatus,
    },
};
use tokio::time::sleep;

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(Target, ServerMessage)>>,
    groups: Mutex<HashSet<(String, String)>>,
}

impl Recorder {
    fn sent_to(&self, target: &Target) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == target)
            .map(|(_, message)| message.clone())
            .collect()
    }

    fn room_states(&self, room_id: &str) -> Vec<GameStatus> {
        self.sent_to(&Target::room(room_id))
            .into_iter()
            .filter_map(|message| match message {
                ServerMessage::State(state) => Some(state.state),
                _ => None,
            })
            .collect()
    }
}

impl Gateway for Recorder {
    fn emit(&self, target: Target, message: ServerMessage) {
        self.sent.lock().unwrap().push((target, message));
    }

    fn join_group(&self, connection_id: &str, room_id: &str) {
        self.groups
            .lock()
            .unwrap()
            .insert((room_id.to_string(), connection_id.to_string()));
    }

    fn leave_group(&self, connection_id: &str, room_id: &str) {
        self.groups
            .lock()
            .unwrap()
            .remove(&(room_id.to_string(), connection_id.to_string()));
    }

    fn close_group(&self, room_id: &str) {
        self.groups
            .lock()
            .unwrap()
            .retain(|(room, _)| room != room_id);
    }
}

fn capitals() -> Quiz {
    Quiz {
        id: "capitals".into(),
        title: "Capitals".into(),
        duration_s: 20,
        questions: vec![
            Question {
                text: "Capital of France?".into(),
                kind: QuestionType::Qcm,
                points: 40,
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
            },
            Question {
                text: "Capital of Italy?".into(),
                kind: QuestionType::Qcm,
                points: 20,
                choices: vec![
                    Choice {
                        text: "Rome".into(),
                        is_correct: true,
                    },
                    Choice {
                        text: "Milan".into(),
                        is_correct: false,
                    },
                ],
            },
        ],
    }
}

fn service() -> (Arc<RoomManagementService>, Arc<Recorder>) {
    let gateway = Arc::new(Recorder::default());
    let service = RoomManagementService::new(
        GameSettings::default(),
        gateway.clone(),
        Arc::new(JsonQuestionBank::new(vec![capitals()])),
        Arc::new(InMemoryHistory::new()),
        Arc::new(GatewayChat::new(gateway.clone())),
    );
    (service, gateway)
}

#[tokio::test(start_paused = true)]
async fn host_and_player_play_a_question() {
    let (service, gateway) = service();

    let created = service.create_game("h1", "capitals").await.unwrap();
    let room_id = created.user.room_id.clone();
    service.join_room("b1", &room_id, "Bob").await.unwrap();
    assert_eq!(service.get_users("h1").await, vec!["Organisateur", "Bob"]);

    service.toggle_lock("h1", true).await;
    assert!(matches!(
        service.join_room("c1", &room_id, "Carol").await,
        Err(RoomError::RoomLocked)
    ));

    service.confirm("h1").await;
    sleep(Duration::from_millis(5_500)).await;

    let states = gateway.room_states(&room_id);
    assert_eq!(
        states,
        vec![GameStatus::Starting, GameStatus::AskingQuestionQcm]
    );
    let asked = gateway
        .sent_to(&Target::room(&room_id))
        .into_iter()
        .filter_map(|message| match message {
            ServerMessage::State(state) => state.payload,
            _ => None,
        })
        .last();
    match asked {
        Some(StatePayload::Question(question)) => {
            assert!(question.choices.iter().all(|choice| !choice.is_correct));
        }
        other => panic!("unexpected payload {other:?}"),
    }

    service.handle_choice("b1", vec![true, false]).await;
    service.validate("b1").await;
    sleep(Duration::from_millis(10)).await;

    assert_eq!(
        service.get_score("b1").await,
        Some(Score {
            score: 48.0,
            bonus: true
        })
    );
    assert!(
        gateway
            .sent_to(&Target::connection("b1"))
            .contains(&ServerMessage::Score(Score {
                score: 48.0,
                bonus: true
            }))
    );
    assert_eq!(
        gateway.room_states(&room_id).last(),
        Some(&GameStatus::ShowResults)
    );
}

#[tokio::test(start_paused = true)]
async fn reconnection_keeps_score_and_host_departure_closes_room() {
    let (service, gateway) = service();

    let created = service.create_game("h1", "capitals").await.unwrap();
    let room_id = created.user.room_id.clone();
    let joined = service.join_room("b1", &room_id, "Bob").await.unwrap();

    service.leave_user("b1").await;
    sleep(Duration::from_secs(1)).await;
    let rejoined = service.rejoin_room(&joined.user, "b2").await.unwrap();
    assert_eq!(
        rejoined.user,
        User {
            name: "Bob".into(),
            room_id: room_id.clone(),
            user_id: "b2".into(),
        }
    );

    sleep(Duration::from_secs(30)).await;
    assert_eq!(service.get_users("b2").await, vec!["Organisateur", "Bob"]);

    service.leave_room("h1").await;
    assert_eq!(service.get_room_id("b2"), None);
    assert!(
        gateway
            .sent_to(&Target::room(&room_id))
            .contains(&ServerMessage::DeleteRoom)
    );
}

#[tokio::test(start_paused = true)]
async fn host_departure_during_question_stops_the_room() {
    let (service, gateway) = service();

    let created = service.create_game("h1", "capitals").await.unwrap();
    let room_id = created.user.room_id.clone();
    service.join_room("b1", &room_id, "Bob").await.unwrap();
    service.toggle_lock("h1", true).await;
    service.confirm("h1").await;
    sleep(Duration::from_millis(7_500)).await;
    assert_eq!(
        gateway.room_states(&room_id).last(),
        Some(&GameStatus::AskingQuestionQcm)
    );

    service.leave_room("h1").await;

    assert_eq!(service.room_count(), 0);
    assert_eq!(service.get_room_id("b1"), None);
    let sent_before = gateway.sent_to(&Target::room(&room_id));
    assert_eq!(sent_before.last(), Some(&ServerMessage::DeleteRoom));

    sleep(Duration::from_secs(60)).await;
    let sent_after = gateway.sent_to(&Target::room(&room_id));
    assert!(
        sent_after[sent_before.len()..]
            .iter()
            .all(|message| !matches!(message, ServerMessage::State(_) | ServerMessage::Timer(_))),
        "room kept running after teardown: {:?}",
        &sent_after[sent_before.len()..]
    );
}

// Integration tests for the classroom room server
// Each test boots the full warp stack on an ephemeral port backed by an in-memory store

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use classroom_live::api;
use classroom_live::store::{ClassroomRecord, MemoryClassroomStore};
use classroom_live::RoomCoordinator;

const ROOM: &str = "physics-101";

async fn spawn_server() -> (SocketAddr, Arc<MemoryClassroomStore>) {
    spawn_server_with_token(None).await
}

async fn spawn_server_with_token(events_token: Option<String>) -> (SocketAddr, Arc<MemoryClassroomStore>) {
    let store = Arc::new(MemoryClassroomStore::with_classrooms([ClassroomRecord {
        id: ROOM.to_string(),
        teacher_id: "teacher".to_string(),
        student_ids: vec!["s1".to_string(), "s2".to_string()],
        is_active: false,
        session_end_time: None,
    }]));
    let coordinator = RoomCoordinator::new(store.clone(), 9);

    let (addr, server) = warp::serve(api::routes(coordinator, events_token)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    (addr, store)
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("Failed to connect");
        Self { ws }
    }

    async fn send(&mut self, event: &str, data: Value) {
        let envelope = json!({ "event": event, "data": data });
        self.ws
            .send(Message::Text(envelope.to_string()))
            .await
            .expect("Failed to send message");
    }

    async fn join(&mut self, user_id: &str) -> Value {
        self.send("join-room", json!({ "roomId": ROOM, "userId": user_id, "name": user_id }))
            .await;
        self.expect("all-users").await
    }

    /// Round-trips a malformed frame so everything sent earlier is known to be applied
    async fn sync(&mut self) {
        self.ws
            .send(Message::Text("ping".to_string()))
            .await
            .expect("Failed to send message");
        let data = self.expect("error").await;
        assert_eq!(data["code"], "invalid-payload");
    }

    async fn next_event(&mut self) -> Value {
        loop {
            match timeout(Duration::from_secs(2), self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(&text).expect("Server sent invalid JSON")
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => panic!("WebSocket error: {}", e),
                Ok(None) => panic!("Connection closed"),
                Err(_) => panic!("Timeout waiting for event"),
            }
        }
    }

    async fn expect(&mut self, event: &str) -> Value {
        let message = self.next_event().await;
        assert_eq!(message["event"], event, "unexpected message {}", message);
        message["data"].clone()
    }

    async fn expect_silence(&mut self) {
        if let Ok(Some(Ok(Message::Text(text)))) =
            timeout(Duration::from_millis(200), self.ws.next()).await
        {
            panic!("Expected no event, got {}", text);
        }
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _) = spawn_server().await;

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "Classroom Live");
}

#[tokio::test]
async fn test_attendee_rejected_while_offline() {
    let (addr, _) = spawn_server().await;
    let mut student = TestClient::connect(addr).await;

    student
        .send("join-room", json!({ "roomId": ROOM, "userId": "s1" }))
        .await;

    let data = student.expect("error").await;
    assert_eq!(data["code"], "class-not-live");
}

#[tokio::test]
async fn test_full_class_session() {
    let (addr, store) = spawn_server().await;

    let mut dashboard = TestClient::connect(addr).await;
    dashboard
        .send("join-classroom-dashboard", json!({ "roomId": ROOM }))
        .await;
    dashboard.sync().await;

    // Presenter opens the room
    let mut presenter = TestClient::connect(addr).await;
    let users = presenter.join("teacher").await;
    assert_eq!(users, json!([]));
    assert_eq!(
        dashboard.expect("class-status-changed").await,
        json!({ "isActive": true })
    );

    let mut s1 = TestClient::connect(addr).await;
    let users = s1.join("s1").await;
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert_eq!(users[0]["userId"], "teacher");
    assert_eq!(users[0]["role"], "presenter");
    let presenter_socket = users[0]["socketId"].as_str().unwrap().to_string();

    let connected = presenter.expect("user-connected").await;
    assert_eq!(connected["userId"], "s1");

    let mut s2 = TestClient::connect(addr).await;
    let users = s2.join("s2").await;
    let ids: Vec<_> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["userId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["teacher", "s1"]);
    let s1_socket = users[1]["socketId"].as_str().unwrap().to_string();

    let s2_socket = presenter.expect("user-connected").await["socketId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(s1.expect("user-connected").await["userId"], "s2");

    // Offer from the newcomer, answer from the presenter
    s2.send(
        "sending-signal",
        json!({ "userToSignal": presenter_socket, "callerID": s2_socket, "signal": { "type": "offer" } }),
    )
    .await;
    let offer = presenter.expect("user-joined").await;
    assert_eq!(offer["callerID"], s2_socket);
    assert_eq!(offer["signal"], json!({ "type": "offer" }));

    presenter
        .send(
            "returning-signal",
            json!({ "callerID": s2_socket, "signal": { "type": "answer" } }),
        )
        .await;
    let answer = s2.expect("receiving-returned-signal").await;
    assert_eq!(answer["id"], presenter_socket);
    assert_eq!(answer["signal"], json!({ "type": "answer" }));

    // s1 drops
    drop(s1);
    let expected = json!({ "userId": "s1", "socketId": s1_socket });
    assert_eq!(presenter.expect("user-disconnected").await, expected);
    assert_eq!(s2.expect("user-disconnected").await, expected);

    let members: Value = reqwest::get(format!("http://{}/rooms/{}/members", addr, ROOM))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(members["isLive"], true);
    assert_eq!(members["stage"]["userId"], "teacher");
    assert_eq!(members["pages"][0][0]["userId"], "s2");
    assert_eq!(members["memberCount"], 2);

    // Only the owner can end it
    s2.send("end-class", json!({ "roomId": ROOM, "userId": "s2" }))
        .await;
    assert_eq!(s2.expect("error").await["code"], "not-owner");

    presenter
        .send("end-class", json!({ "roomId": ROOM, "userId": "teacher" }))
        .await;
    presenter.expect("class-ended").await;
    s2.expect("class-ended").await;
    assert_eq!(
        dashboard.expect("class-status-changed").await,
        json!({ "isActive": false })
    );

    presenter.expect_silence().await;
    assert!(!store.get(ROOM).await.unwrap().is_active);
}

#[tokio::test]
async fn test_hand_raise_and_chat() {
    let (addr, _) = spawn_server().await;

    let mut presenter = TestClient::connect(addr).await;
    presenter.join("teacher").await;
    let mut student = TestClient::connect(addr).await;
    student.join("s1").await;
    presenter.expect("user-connected").await;

    student
        .send("raise-hand", json!({ "roomId": ROOM, "userId": "s1" }))
        .await;
    assert_eq!(presenter.expect("user-raised-hand").await, "s1");
    assert_eq!(student.expect("user-raised-hand").await, "s1");

    presenter
        .send("lower-hand", json!({ "roomId": ROOM, "userId": "s1" }))
        .await;
    assert_eq!(student.expect("user-lowered-hand").await, "s1");
    assert_eq!(presenter.expect("user-lowered-hand").await, "s1");

    student
        .send(
            "send-message",
            json!({ "roomId": ROOM, "user": "Student One", "text": "question", "time": "09:15" }),
        )
        .await;
    let message = presenter.expect("receive-message").await;
    assert_eq!(message["text"], "question");
    assert_eq!(message["user"], "Student One");
}

#[tokio::test]
async fn test_content_notification_reaches_dashboard() {
    let (addr, _) = spawn_server().await;

    let mut dashboard = TestClient::connect(addr).await;
    dashboard
        .send("join-classroom-dashboard", json!({ "roomId": ROOM }))
        .await;
    dashboard.sync().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/classrooms/{}/events", addr, ROOM))
        .json(&json!({ "event": "assignment-created", "data": { "title": "Lab report" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["delivered"], 1);

    let data = dashboard.expect("assignment-created").await;
    assert_eq!(data["title"], "Lab report");

    let resp = client
        .post(format!("http://{}/classrooms/{}/events", addr, ROOM))
        .json(&json!({ "event": "class-ended" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_content_notification_requires_token_when_configured() {
    let (addr, _) = spawn_server_with_token(Some("crud-service-token".to_string())).await;

    let mut dashboard = TestClient::connect(addr).await;
    dashboard
        .send("join-classroom-dashboard", json!({ "roomId": ROOM }))
        .await;
    dashboard.sync().await;

    let url = format!("http://{}/classrooms/{}/events", addr, ROOM);
    let event = json!({ "event": "announcement-created", "data": { "text": "fake" } });
    let client = reqwest::Client::new();

    let resp = client.post(&url).json(&event).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    dashboard.expect_silence().await;

    let resp = client
        .post(&url)
        .bearer_auth("crud-service-token")
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(dashboard.expect("announcement-created").await["text"], "fake");
}

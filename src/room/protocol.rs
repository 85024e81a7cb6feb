//! Wire format of the room WebSocket.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": <payload>}`.
//! Field names follow the browser client (`roomId`, `userId`, `callerID`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warp::ws::Message;

use super::membership::{Participant, Role};
use crate::error::Result;

/// Events sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoom),
    LeaveRoom(RoomUser),
    StartClass(StartClass),
    EndClass(RoomUser),
    RaiseHand(RoomUser),
    LowerHand(RoomUser),
    ToggleMedia(ToggleMedia),
    SendMessage(ChatMessage),
    SendingSignal(SendingSignal),
    ReturningSignal(ReturningSignal),
    JoinClassroomDashboard(DashboardRef),
    LeaveClassroomDashboard(DashboardRef),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::LeaveRoom(_) => "leave-room",
            ClientEvent::StartClass(_) => "start-class",
            ClientEvent::EndClass(_) => "end-class",
            ClientEvent::RaiseHand(_) => "raise-hand",
            ClientEvent::LowerHand(_) => "lower-hand",
            ClientEvent::ToggleMedia(_) => "toggle-media",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::SendingSignal(_) => "sending-signal",
            ClientEvent::ReturningSignal(_) => "returning-signal",
            ClientEvent::JoinClassroomDashboard(_) => "join-classroom-dashboard",
            ClientEvent::LeaveClassroomDashboard(_) => "leave-classroom-dashboard",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: String,
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_video_off: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub room_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartClass {
    pub room_id: String,
    pub user_id: String,
    /// Minutes until the class ends on its own; absent or 0 means no timer
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleMedia {
    pub room_id: String,
    pub user_id: String,
    pub is_video_off: bool,
    pub is_muted: bool,
}

/// Chat line. Relayed as received, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub user: String,
    pub text: String,
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingSignal {
    #[serde(rename = "userToSignal")]
    pub user_to_signal: String,
    /// Ignored: the relay tags offers with the sender's own connection id
    #[serde(rename = "callerID", default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub signal: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturningSignal {
    #[serde(rename = "callerID")]
    pub caller_id: String,
    pub signal: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRef {
    pub room_id: String,
}

/// Events sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    AllUsers(Vec<ParticipantView>),
    UserConnected(ParticipantView),
    UserDisconnected(Departure),
    UserJoined(IncomingSignal),
    ReceivingReturnedSignal(ReturnedSignal),
    UserRaisedHand(String),
    UserLoweredHand(String),
    UserToggledMedia(MediaUpdate),
    ReceiveMessage(ChatMessage),
    ClassEnded,
    ClassStatusChanged(ClassStatus),
    AnnouncementCreated(Value),
    MaterialCreated(Value),
    AssignmentCreated(Value),
    AssignmentDeleted(Value),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// Participant as seen by other clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub name: String,
    pub socket_id: String,
    pub role: Role,
    pub is_muted: bool,
    pub is_video_off: bool,
    pub hand_raised: bool,
}

impl From<&Participant> for ParticipantView {
    fn from(p: &Participant) -> Self {
        Self {
            user_id: p.user_id.clone(),
            name: p.display_name.clone(),
            socket_id: p.connection_id.clone(),
            role: p.role,
            is_muted: p.media.is_muted,
            is_video_off: p.media.is_video_off,
            hand_raised: p.hand_raised,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Departure {
    pub user_id: String,
    pub socket_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingSignal {
    pub signal: Value,
    #[serde(rename = "callerID")]
    pub caller_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnedSignal {
    pub signal: Value,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaUpdate {
    pub user_id: String,
    pub is_video_off: bool,
    pub is_muted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatus {
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Classroom content notifications published by the CRUD service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ContentEvent {
    AnnouncementCreated(Value),
    MaterialCreated(Value),
    AssignmentCreated(Value),
    AssignmentDeleted(Value),
}

impl From<ContentEvent> for ServerEvent {
    fn from(event: ContentEvent) -> Self {
        match event {
            ContentEvent::AnnouncementCreated(v) => ServerEvent::AnnouncementCreated(v),
            ContentEvent::MaterialCreated(v) => ServerEvent::MaterialCreated(v),
            ContentEvent::AssignmentCreated(v) => ServerEvent::AssignmentCreated(v),
            ContentEvent::AssignmentDeleted(v) => ServerEvent::AssignmentDeleted(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_parses_client_payload() {
        let raw = json!({
            "event": "join-room",
            "data": { "roomId": "r1", "userId": "u1", "name": "Ada", "isMuted": true }
        });

        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::JoinRoom(join) => {
                assert_eq!(join.room_id, "r1");
                assert_eq!(join.user_id, "u1");
                assert_eq!(join.name, "Ada");
                assert!(join.is_muted);
                assert!(!join.is_video_off);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_join_without_user_id_is_rejected() {
        let raw = json!({ "event": "join-room", "data": { "roomId": "r1", "name": "Ada" } });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let raw = json!({ "event": "kick-user", "data": { "roomId": "r1" } });
        assert!(serde_json::from_value::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn test_signal_field_names() {
        let raw = json!({
            "event": "sending-signal",
            "data": { "userToSignal": "c2", "callerID": "c1", "signal": { "type": "offer", "sdp": "v=0" } }
        });

        match serde_json::from_value::<ClientEvent>(raw).unwrap() {
            ClientEvent::SendingSignal(s) => {
                assert_eq!(s.user_to_signal, "c2");
                assert_eq!(s.caller_id.as_deref(), Some("c1"));
                assert_eq!(s.signal["type"], "offer");
            }
            other => panic!("unexpected event {:?}", other),
        }

        let out = ServerEvent::UserJoined(IncomingSignal {
            signal: json!({ "type": "offer" }),
            caller_id: "c1".to_string(),
        });
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["event"], "user-joined");
        assert_eq!(value["data"]["callerID"], "c1");
    }

    #[test]
    fn test_server_event_envelopes() {
        let ended = serde_json::to_value(ServerEvent::ClassEnded).unwrap();
        assert_eq!(ended, json!({ "event": "class-ended" }));

        let status = serde_json::to_value(ServerEvent::ClassStatusChanged(ClassStatus {
            is_active: true,
        }))
        .unwrap();
        assert_eq!(
            status,
            json!({ "event": "class-status-changed", "data": { "isActive": true } })
        );

        let hand = serde_json::to_value(ServerEvent::UserRaisedHand("u1".to_string())).unwrap();
        assert_eq!(hand, json!({ "event": "user-raised-hand", "data": "u1" }));
    }

    #[test]
    fn test_content_event_maps_to_dashboard_event() {
        let raw = json!({ "event": "assignment-deleted", "data": "a-42" });
        let content: ContentEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            ServerEvent::from(content),
            ServerEvent::AssignmentDeleted(json!("a-42"))
        );
    }
}

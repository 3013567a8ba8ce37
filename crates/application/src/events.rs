//! 实时协议的事件类型
//!
//! 帧格式：`{"event": "<name>", "data": <payload>}`。入站事件名在边界处解析一次，
//! 之后只以 [`ClientEvent`] 的形式流转。

use domain::{MessageId, MessageType, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::dto::{MessageDto, UserSummary};

pub const KNOWN_CLIENT_EVENTS: &[&str] = &[
    "join-room",
    "leave-room",
    "send-message",
    "typing-start",
    "typing-stop",
    "message-reaction",
    "edit-message",
];

/// `join-room` / `leave-room` 既接受裸房间 id，也接受 `{roomId}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomTarget {
    Bare(RoomId),
    Object {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },
}

impl RoomTarget {
    pub fn room_id(&self) -> RoomId {
        match self {
            RoomTarget::Bare(room_id) | RoomTarget::Object { room_id } => *room_id,
        }
    }
}

impl From<RoomId> for RoomTarget {
    fn from(room_id: RoomId) -> Self {
        RoomTarget::Bare(room_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub content: String,
    pub room_id: RoomId,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: MessageId,
    pub reaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: MessageId,
    pub content: String,
}

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(RoomTarget),
    LeaveRoom(RoomTarget),
    SendMessage(SendMessagePayload),
    TypingStart(TypingPayload),
    TypingStop(TypingPayload),
    MessageReaction(ReactionPayload),
    EditMessage(EditMessagePayload),
}

/// 入站文本帧的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Event(ClientEvent),
    /// 未知事件名，直接忽略
    Unknown(String),
    /// 已知事件但负载不合法
    Malformed(String),
}

#[derive(Deserialize)]
struct EventName {
    event: String,
}

impl Inbound {
    pub fn decode(text: &str) -> Self {
        let name = match serde_json::from_str::<EventName>(text) {
            Ok(frame) => frame.event,
            Err(err) => return Inbound::Malformed(err.to_string()),
        };

        if !KNOWN_CLIENT_EVENTS.contains(&name.as_str()) {
            return Inbound::Unknown(name);
        }

        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => Inbound::Event(event),
            Err(err) => Inbound::Malformed(format!("{name}: {err}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipNotice {
    pub user: UserSummary,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
    pub username: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTypingNotice {
    pub user_id: UserId,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineNotice {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionNotice {
    pub message_id: MessageId,
    pub reaction: String,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthErrorNotice {
    pub reason: String,
    pub message: String,
}

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewMessage(MessageDto),
    MessageEdited(MessageDto),
    UserJoined(MembershipNotice),
    UserLeft(MembershipNotice),
    UserTyping(TypingNotice),
    UserStopTyping(StopTypingNotice),
    UserOffline(OfflineNotice),
    MessageReaction(ReactionNotice),
    Error(ErrorNotice),
    AuthError(AuthErrorNotice),
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageEdited(_) => "message-edited",
            ServerEvent::UserJoined(_) => "user-joined",
            ServerEvent::UserLeft(_) => "user-left",
            ServerEvent::UserTyping(_) => "user-typing",
            ServerEvent::UserStopTyping(_) => "user-stop-typing",
            ServerEvent::UserOffline(_) => "user-offline",
            ServerEvent::MessageReaction(_) => "message-reaction",
            ServerEvent::Error(_) => "error",
            ServerEvent::AuthError(_) => "auth-error",
        }
    }
}

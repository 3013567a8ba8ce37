use domain::{IdentityContext, Message, MessageId, MessageType, RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

impl From<&IdentityContext> for UserSummary {
    fn from(identity: &IdentityContext) -> Self {
        Self {
            id: identity.user_id,
            username: identity.username.clone(),
        }
    }
}

/// 扇出给订阅者的完整消息，附带发送者的展示字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub content: String,
    pub sender: UserSummary,
    pub room_id: RoomId,
    pub message_type: MessageType,
    pub edited: bool,
    pub edited_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl MessageDto {
    pub fn new(message: &Message, sender: UserSummary) -> Self {
        Self {
            id: message.id,
            content: message.content.as_str().to_owned(),
            sender,
            room_id: message.room_id,
            message_type: message.message_type,
            edited: message.edited,
            edited_at: message.edited_at,
            created_at: message.created_at,
        }
    }
}

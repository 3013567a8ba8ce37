use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "system" => Ok(MessageType::System),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown type {other}"),
            )),
        }
    }
}

/// 尚未持久化的消息；id 与 created_at 由存储分配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub edited: bool,
    pub edited_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Message {
    pub fn from_draft(id: MessageId, draft: NewMessage, created_at: Timestamp) -> Self {
        Self {
            id,
            room_id: draft.room_id,
            sender_id: draft.sender_id,
            content: draft.content,
            message_type: draft.message_type,
            edited: false,
            edited_at: None,
            created_at,
        }
    }

    /// 只有原发送者可以修改内容。
    pub fn edit(
        &mut self,
        editor: UserId,
        content: MessageContent,
        at: Timestamp,
    ) -> Result<(), DomainError> {
        if editor != self.sender_id {
            return Err(DomainError::OperationNotAllowed);
        }
        self.content = content;
        self.edited = true;
        self.edited_at = Some(at);
        Ok(())
    }
}

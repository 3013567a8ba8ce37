use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub creator_id: UserId,
    pub is_private: bool,
    pub max_members: u32,
    pub created_at: Timestamp,
}

impl ChatRoom {
    pub const DEFAULT_MAX_MEMBERS: u32 = 100;

    pub fn new(
        id: RoomId,
        name: impl Into<String>,
        creator_id: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            id,
            name,
            description: String::new(),
            creator_id,
            is_private: false,
            max_members: Self::DEFAULT_MAX_MEMBERS,
            created_at,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn with_max_members(mut self, max_members: u32) -> Result<Self, DomainError> {
        if max_members == 0 {
            return Err(DomainError::invalid_argument(
                "max_members",
                "must be at least 1",
            ));
        }
        self.max_members = max_members;
        Ok(self)
    }

    /// 当前成员数为 `current` 时是否还能再加入一人。
    pub fn has_room_for(&self, current: usize) -> bool {
        current < self.max_members as usize
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("room_name", "cannot be empty"));
        }
        if trimmed.chars().count() > 50 {
            return Err(DomainError::invalid_argument("room_name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

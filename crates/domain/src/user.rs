use serde::{Deserialize, Serialize};

use crate::value_objects::{Timestamp, UserId};

/// 用户实体。凭证与资料由外部协作方维护，这里只关心在线状态。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub is_online: bool,
    pub last_seen: Option<Timestamp>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            is_online: false,
            last_seen: None,
        }
    }

    pub fn set_presence(&mut self, is_online: bool, at: Timestamp) {
        self.is_online = is_online;
        self.last_seen = Some(at);
    }
}

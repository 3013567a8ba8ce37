use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 握手校验通过后附着在连接上的身份。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    pub user_id: UserId,
    pub username: String,
}

impl IdentityContext {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

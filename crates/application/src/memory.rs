//! 内存实现的存储与凭证校验（用于测试和嵌入式场景）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use domain::{
    ChatRoom, IdentityContext, Message, MessageId, NewMessage, RepositoryError, RoomId,
    RoomMember, Timestamp, User, UserId,
};
use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::identity::CredentialVerifier;
use crate::repository::{
    ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository,
};

#[derive(Default)]
struct StoreState {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, ChatRoom>,
    members: HashMap<RoomId, Vec<RoomMember>>,
    messages: HashMap<MessageId, Message>,
    // 按写入顺序记录每个房间的消息
    room_log: HashMap<RoomId, Vec<MessageId>>,
    fail_message_writes: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后所有消息写入都返回存储错误
    pub async fn fail_message_writes(&self, fail: bool) {
        self.state.write().await.fail_message_writes = fail;
    }

    pub async fn messages_in_room(&self, room_id: RoomId) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .room_log
            .get(&room_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.messages.get(id).cloned())
            .collect()
    }

    pub async fn user(&self, user_id: UserId) -> Option<User> {
        self.state.read().await.users.get(&user_id).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn update_presence(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.set_presence(is_online, last_seen);
        Ok(())
    }
}

#[async_trait]
impl ChatRoomRepository for InMemoryStore {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let mut state = self.state.write().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        Ok(self.state.read().await.rooms.get(&id).cloned())
    }
}

#[async_trait]
impl RoomMemberRepository for InMemoryStore {
    async fn insert(&self, member: RoomMember) -> Result<RoomMember, RepositoryError> {
        let mut state = self.state.write().await;
        let members = state.members.entry(member.room_id).or_default();
        if members.iter().any(|m| m.user_id == member.user_id) {
            return Err(RepositoryError::Conflict);
        }
        members.push(member.clone());
        Ok(member)
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(&room_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
            .cloned())
    }

    async fn remove(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(members) = state.members.get_mut(&room_id) else {
            return Ok(false);
        };
        let before = members.len();
        members.retain(|m| m.user_id != user_id);
        Ok(members.len() != before)
    }

    async fn count_members(&self, room_id: RoomId) -> Result<usize, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&room_id)
            .map_or(0, Vec::len))
    }

    async fn list_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&room_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.user_id == user_id))
            .map(|(room_id, _)| *room_id)
            .collect())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if state.fail_message_writes {
            return Err(RepositoryError::storage("message store unavailable"));
        }
        let stored = Message::from_draft(MessageId::random(), message, Utc::now());
        state
            .room_log
            .entry(stored.room_id)
            .or_default()
            .push(stored.id);
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut state = self.state.write().await;
        if state.fail_message_writes {
            return Err(RepositoryError::storage("message store unavailable"));
        }
        let slot = state
            .messages
            .get_mut(&message.id)
            .ok_or(RepositoryError::NotFound)?;
        *slot = message.clone();
        Ok(message)
    }
}

/// 令牌 → 身份的静态表
#[derive(Default)]
pub struct InMemoryCredentials {
    tokens: RwLock<HashMap<String, Result<IdentityContext, AuthError>>>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issue(&self, token: impl Into<String>, identity: IdentityContext) {
        self.tokens.write().await.insert(token.into(), Ok(identity));
    }

    pub async fn expire(&self, token: &str) {
        if let Some(entry) = self.tokens.write().await.get_mut(token) {
            *entry = Err(AuthError::Expired);
        }
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentials {
    async fn verify(&self, token: &str) -> Result<IdentityContext, AuthError> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .unwrap_or(Err(AuthError::Invalid))
    }
}

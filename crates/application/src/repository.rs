use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageId, NewMessage, RepositoryError, RoomId, RoomMember, Timestamp, User,
    UserId,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn update_presence(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError>;
    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
}

#[async_trait]
pub trait RoomMemberRepository: Send + Sync {
    /// 插入新的成员关系；(room_id, user_id) 已存在时返回 `Conflict`
    async fn insert(&self, member: RoomMember) -> Result<RoomMember, RepositoryError>;
    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError>;
    /// 返回是否真的删除了一条记录
    async fn remove(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError>;
    async fn count_members(&self, room_id: RoomId) -> Result<usize, RepositoryError>;
    async fn list_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>, RepositoryError>;
    async fn list_rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 由存储分配 id 与 created_at，写入成功即为提交点
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    async fn update(&self, message: Message) -> Result<Message, RepositoryError>;
}

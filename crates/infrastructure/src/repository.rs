//! PostgreSQL 存储实现
//!
//! 一个连接池同时实现四个存储 trait。查询均为运行时 SQL，不依赖编译期数据库连接。

use application::{ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRoom, Message, MessageContent, MessageId, MessageType, NewMessage, RepositoryError,
    RoomId, RoomMember, Timestamp, User, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => RepositoryError::Conflict,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    is_online: bool,
    last_seen: Option<DateTime<Utc>>,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        User {
            id: UserId::from(value.id),
            username: value.username,
            is_online: value.is_online,
            last_seen: value.last_seen,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
    description: String,
    creator_id: Uuid,
    is_private: bool,
    max_members: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<RoomRecord> for ChatRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let max_members = u32::try_from(value.max_members)
            .map_err(|_| invalid_data(format!("negative max_members for room {}", value.id)))?;
        Ok(ChatRoom {
            id: RoomId::from(value.id),
            name: value.name,
            description: value.description,
            creator_id: UserId::from(value.creator_id),
            is_private: value.is_private,
            max_members,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    room_id: Uuid,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
}

impl From<MemberRecord> for RoomMember {
    fn from(value: MemberRecord) -> Self {
        RoomMember::new(
            RoomId::from(value.room_id),
            UserId::from(value.user_id),
            value.joined_at,
        )
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    edited: bool,
    edited_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let message_type =
            MessageType::parse(&value.message_type).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            content,
            message_type,
            edited: value.edited,
            edited_at: value.edited_at,
            created_at: value.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, room_id, sender_id, content, message_type, edited, edited_at, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, is_online, last_seen)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, is_online, last_seen
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(user.is_online)
        .bind(user.last_seen)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(User::from(record))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"SELECT id, username, is_online, last_seen FROM users WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(User::from))
    }

    async fn update_presence(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE users SET is_online = $2, last_seen = $3 WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .bind(is_online)
        .bind(last_seen)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatRoomRepository for PgStore {
    async fn create(&self, room: ChatRoom) -> Result<ChatRoom, RepositoryError> {
        let max_members = i32::try_from(room.max_members)
            .map_err(|_| invalid_data("max_members out of range"))?;
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            INSERT INTO chat_rooms (id, name, description, creator_id, is_private, max_members, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, name, description, creator_id, is_private, max_members, created_at
            "#,
        )
        .bind(Uuid::from(room.id))
        .bind(&room.name)
        .bind(&room.description)
        .bind(Uuid::from(room.creator_id))
        .bind(room.is_private)
        .bind(max_members)
        .bind(room.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        ChatRoom::try_from(record)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT id, name, description, creator_id, is_private, max_members, created_at
            FROM chat_rooms WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(ChatRoom::try_from).transpose()
    }
}

#[async_trait]
impl RoomMemberRepository for PgStore {
    async fn insert(&self, member: RoomMember) -> Result<RoomMember, RepositoryError> {
        // 主键冲突由 map_sqlx_err 转换为 Conflict
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            INSERT INTO room_members (room_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            RETURNING room_id, user_id, joined_at
            "#,
        )
        .bind(Uuid::from(member.room_id))
        .bind(Uuid::from(member.user_id))
        .bind(member.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(RoomMember::from(record))
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id, joined_at FROM room_members WHERE room_id = $1 AND user_id = $2"#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(RoomMember::from))
    }

    async fn remove(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(r#"DELETE FROM room_members WHERE room_id = $1 AND user_id = $2"#)
            .bind(Uuid::from(room_id))
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_members(&self, room_id: RoomId) -> Result<usize, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM room_members WHERE room_id = $1"#)
                .bind(Uuid::from(room_id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        usize::try_from(count).map_err(|_| invalid_data("negative member count"))
    }

    async fn list_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>, RepositoryError> {
        let records = sqlx::query_as::<_, MemberRecord>(
            r#"SELECT room_id, user_id, joined_at FROM room_members WHERE room_id = $1 ORDER BY joined_at"#,
        )
        .bind(Uuid::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(RoomMember::from).collect())
    }

    async fn list_rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT room_id FROM room_members WHERE user_id = $1"#)
                .bind(Uuid::from(user_id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(RoomId::from).collect())
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let sql = format!(
            "INSERT INTO messages (id, room_id, sender_id, content, message_type) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(MessageId::random()))
            .bind(Uuid::from(message.room_id))
            .bind(Uuid::from(message.sender_id))
            .bind(message.content.as_str())
            .bind(message.message_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update(&self, message: Message) -> Result<Message, RepositoryError> {
        let sql = format!(
            "UPDATE messages SET content = $2, message_type = $3, edited = $4, edited_at = $5 \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(message.id))
            .bind(message.content.as_str())
            .bind(message.message_type.as_str())
            .bind(message.edited)
            .bind(message.edited_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

        Message::try_from(record)
    }
}

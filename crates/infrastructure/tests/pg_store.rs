//! PostgreSQL 存储集成测试
//!
//! 需要设置 `DATABASE_URL`，未设置时跳过。

use application::{ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository};
use chrono::Utc;
use domain::{
    ChatRoom, MessageContent, MessageId, MessageType, NewMessage, RepositoryError, RoomId,
    RoomMember, User, UserId,
};
use infrastructure::{create_pg_pool, PgStore};

async fn setup_store() -> Option<PgStore> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping postgres test");
        return None;
    };

    let pool = create_pg_pool(&database_url, 5)
        .await
        .expect("Failed to create test database pool");

    // 运行迁移
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    Some(PgStore::new(pool))
}

async fn seed(store: &PgStore) -> (UserId, RoomId) {
    let user = User::new(UserId::random(), format!("user_{}", &UserId::random().to_string()[..8]));
    let user_id = user.id;
    UserRepository::create(store, user).await.expect("create user");

    let room = ChatRoom::new(RoomId::random(), "pg-room", user_id, Utc::now())
        .expect("room")
        .with_description("integration")
        .with_max_members(3)
        .expect("capacity");
    let room_id = room.id;
    ChatRoomRepository::create(store, room).await.expect("create room");

    (user_id, room_id)
}

#[tokio::test]
async fn membership_roundtrip_and_duplicate_conflict() {
    let Some(store) = setup_store().await else { return };
    let (user_id, room_id) = seed(&store).await;

    let room = ChatRoomRepository::find_by_id(&store, room_id)
        .await
        .unwrap()
        .expect("room exists");
    assert_eq!(room.max_members, 3);
    assert_eq!(room.description, "integration");

    store
        .insert(RoomMember::new(room_id, user_id, Utc::now()))
        .await
        .unwrap();
    let duplicate = store.insert(RoomMember::new(room_id, user_id, Utc::now())).await;
    assert_eq!(duplicate.unwrap_err(), RepositoryError::Conflict);

    assert_eq!(store.count_members(room_id).await.unwrap(), 1);
    assert_eq!(store.list_rooms_for_user(user_id).await.unwrap(), vec![room_id]);
    assert!(store.remove(room_id, user_id).await.unwrap());
    assert!(!store.remove(room_id, user_id).await.unwrap());
}

#[tokio::test]
async fn message_store_assigns_id_and_persists_edits() {
    let Some(store) = setup_store().await else { return };
    let (user_id, room_id) = seed(&store).await;

    let created = MessageRepository::create(
        &store,
        NewMessage {
            room_id,
            sender_id: user_id,
            content: MessageContent::new("hello").unwrap(),
            message_type: MessageType::Text,
        },
    )
    .await
    .unwrap();
    assert!(!created.edited);

    let mut edited = created.clone();
    edited
        .edit(user_id, MessageContent::new("hello again").unwrap(), Utc::now())
        .unwrap();
    let stored = store.update(edited).await.unwrap();
    assert!(stored.edited);
    assert_eq!(stored.content.as_str(), "hello again");

    let missing = MessageRepository::find_by_id(&store, MessageId::random())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn presence_update_touches_last_seen() {
    let Some(store) = setup_store().await else { return };
    let (user_id, _) = seed(&store).await;
    let now = Utc::now();

    store.update_presence(user_id, true, now).await.unwrap();

    let user = UserRepository::find_by_id(&store, user_id)
        .await
        .unwrap()
        .expect("user exists");
    assert!(user.is_online);
    assert!(user.last_seen.is_some());

    let unknown = store.update_presence(UserId::random(), false, now).await;
    assert_eq!(unknown.unwrap_err(), RepositoryError::NotFound);
}

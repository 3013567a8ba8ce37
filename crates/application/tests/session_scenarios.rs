//! 会话层场景测试
//!
//! 使用内存存储驱动 ConnectionSessionManager，验证握手、成员关系、消息扇出、
//! 输入状态与离线通知的端到端行为。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::events::{RoomTarget, SendMessagePayload, TypingPayload};
use application::memory::{InMemoryCredentials, InMemoryStore};
use application::{
    AuthError, ChatRoomRepository, ClientEvent, ConnectionSessionManager, CredentialVerifier,
    Inbound, RoomMemberRepository, ServerEvent, Session, SessionDependencies, SessionSettings,
    SystemClock, UserRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{ChatRoom, IdentityContext, MessageType, RepositoryError, RoomId, RoomMember, User, UserId};
use tokio::sync::{mpsc, Notify};

struct Harness {
    store: Arc<InMemoryStore>,
    credentials: Arc<InMemoryCredentials>,
    manager: ConnectionSessionManager,
}

struct Client {
    session: Session,
    events: mpsc::Receiver<ServerEvent>,
}

impl Client {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn drain_names(&mut self) -> Vec<&'static str> {
        self.drain().iter().map(ServerEvent::name).collect()
    }
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    /// 在默认依赖上替换部分协作方
    fn with(customize: impl FnOnce(&mut SessionDependencies)) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let credentials = Arc::new(InMemoryCredentials::new());
        let mut deps = SessionDependencies {
            verifier: credentials.clone(),
            users: store.clone(),
            rooms: store.clone(),
            members: store.clone(),
            messages: store.clone(),
            clock: Arc::new(SystemClock),
        };
        customize(&mut deps);
        let settings = SessionSettings {
            typing_timeout: Duration::from_secs(5),
            typing_sweep_interval: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(2),
        };
        Self {
            store,
            credentials,
            manager: ConnectionSessionManager::new(deps, settings),
        }
    }

    async fn user(&self, name: &str) -> IdentityContext {
        let user = User::new(UserId::random(), name);
        let identity = IdentityContext::new(user.id, name);
        UserRepository::create(self.store.as_ref(), user)
            .await
            .expect("create user");
        self.credentials
            .issue(format!("token-{name}"), identity.clone())
            .await;
        identity
    }

    async fn room(&self, name: &str, creator: &IdentityContext, max_members: u32) -> RoomId {
        let room = ChatRoom::new(RoomId::random(), name, creator.user_id, Utc::now())
            .expect("room")
            .with_max_members(max_members)
            .expect("capacity");
        let room_id = room.id;
        ChatRoomRepository::create(self.store.as_ref(), room)
            .await
            .expect("create room");
        room_id
    }

    async fn connect(&self, identity: &IdentityContext) -> Client {
        let (tx, rx) = mpsc::channel(64);
        let token = format!("token-{}", identity.username);
        let session = self
            .manager
            .on_connect(Some(&token), tx)
            .await
            .expect("handshake");
        Client {
            session,
            events: rx,
        }
    }

    async fn send(&self, client: &mut Client, event: ClientEvent) {
        self.manager.on_event(&mut client.session, event).await;
    }
}

/// 永远不返回的凭证校验
struct StalledVerifier;

#[async_trait]
impl CredentialVerifier for StalledVerifier {
    async fn verify(&self, _token: &str) -> Result<IdentityContext, AuthError> {
        std::future::pending().await
    }
}

/// 武装后，下一次 `list_rooms_for_user` 会停住，直到测试放行
struct GatedMembers {
    inner: Arc<dyn RoomMemberRepository>,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedMembers {
    fn new(inner: Arc<dyn RoomMemberRepository>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl RoomMemberRepository for GatedMembers {
    async fn insert(&self, member: RoomMember) -> Result<RoomMember, RepositoryError> {
        self.inner.insert(member).await
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        self.inner.find(room_id, user_id).await
    }

    async fn remove(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        self.inner.remove(room_id, user_id).await
    }

    async fn count_members(&self, room_id: RoomId) -> Result<usize, RepositoryError> {
        self.inner.count_members(room_id).await
    }

    async fn list_members(&self, room_id: RoomId) -> Result<Vec<RoomMember>, RepositoryError> {
        self.inner.list_members(room_id).await
    }

    async fn list_rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, RepositoryError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.list_rooms_for_user(user_id).await
    }
}

fn join(room_id: RoomId) -> ClientEvent {
    ClientEvent::JoinRoom(RoomTarget::from(room_id))
}

fn say(room_id: RoomId, content: &str) -> ClientEvent {
    ClientEvent::SendMessage(SendMessagePayload {
        content: content.to_string(),
        room_id,
        message_type: MessageType::Text,
    })
}

#[tokio::test]
async fn scenario_two_members_chat_and_third_is_refused() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let u3 = h.user("u3").await;
    let general = h.room("general", &u1, 2).await;

    let mut c1 = h.connect(&u1).await;
    let mut c2 = h.connect(&u2).await;
    let mut c3 = h.connect(&u3).await;

    h.send(&mut c1, join(general)).await;
    h.send(&mut c2, join(general)).await;
    assert_eq!(c1.drain_names(), ["user-joined"]);
    assert!(c2.drain().is_empty());

    h.send(&mut c1, say(general, "hi")).await;
    for client in [&mut c1, &mut c2] {
        match client.drain().as_slice() {
            [ServerEvent::NewMessage(message)] => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.sender.id, u1.user_id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    h.send(&mut c3, join(general)).await;
    match c3.drain().as_slice() {
        [ServerEvent::Error(notice)] => assert!(notice.message.contains("full")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!c3.session.is_subscribed(general));
    assert!(c1.drain().is_empty());
}

#[tokio::test]
async fn scenario_missing_token_leaves_no_trace() {
    let h = Harness::new();
    let (tx, _rx) = mpsc::channel(8);

    let result = h.manager.on_connect(None, tx.clone()).await;
    assert_eq!(result.unwrap_err(), AuthError::Missing);

    let result = h.manager.on_connect(Some("   "), tx.clone()).await;
    assert_eq!(result.unwrap_err(), AuthError::Missing);

    let result = h.manager.on_connect(Some("forged"), tx).await;
    assert_eq!(result.unwrap_err(), AuthError::Invalid);

    assert_eq!(h.manager.broadcaster().connection_count().await, 0);
}

#[tokio::test]
async fn expired_token_is_refused() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    h.credentials.expire("token-u1").await;
    let (tx, _rx) = mpsc::channel(8);

    let result = h.manager.on_connect(Some("token-u1"), tx).await;

    assert_eq!(result.unwrap_err(), AuthError::Expired);
    assert!(!h.manager.presence().is_online(u1.user_id).await);
}

#[tokio::test]
async fn scenario_sending_to_unjoined_room_is_refused() {
    let h = Harness::new();
    let owner = h.user("owner").await;
    let u1 = h.user("u1").await;
    let room = h.room("private", &owner, 10).await;
    let mut owner_client = h.connect(&owner).await;
    h.send(&mut owner_client, join(room)).await;

    let mut c1 = h.connect(&u1).await;
    h.send(&mut c1, say(room, "let me in")).await;

    match c1.drain().as_slice() {
        [ServerEvent::Error(notice)] => assert!(notice.message.contains("not a member")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(owner_client.drain().is_empty());
    assert!(h.store.messages_in_room(room).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_typing_is_debounced_and_rearms_after_timeout() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut c1 = h.connect(&u1).await;
    let mut c2 = h.connect(&u2).await;
    h.send(&mut c1, join(room)).await;
    h.send(&mut c2, join(room)).await;
    c1.drain();

    let typing = ClientEvent::TypingStart(TypingPayload { room_id: room });
    h.send(&mut c1, typing.clone()).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    h.send(&mut c1, typing.clone()).await;
    assert_eq!(c2.drain_names(), ["user-typing"]);
    assert!(c1.drain().is_empty());

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(!h.manager.typing().is_typing(room, u1.user_id).await);

    h.send(&mut c1, typing).await;
    assert_eq!(c2.drain_names(), ["user-typing"]);

    h.send(&mut c1, ClientEvent::TypingStop(TypingPayload { room_id: room })).await;
    assert_eq!(c2.drain_names(), ["user-stop-typing"]);
}

#[tokio::test]
async fn memberships_are_resubscribed_on_connect() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let room = h.room("general", &u1, 10).await;
    let mut first = h.connect(&u1).await;
    h.send(&mut first, join(room)).await;

    let second = h.connect(&u1).await;

    assert!(second.session.is_subscribed(room));
    assert_eq!(h.manager.presence().connection_count(u1.user_id).await, 2);
    assert_eq!(h.manager.presence().online_count(room).await.unwrap(), 1);
    let stored = h.store.user(u1.user_id).await.unwrap();
    assert!(stored.is_online);
    assert!(stored.last_seen.is_some());
}

#[tokio::test]
async fn offline_notice_is_sent_once_after_last_connection() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let lobby = h.room("lobby", &u1, 10).await;
    let games = h.room("games", &u1, 10).await;

    let mut observer = h.connect(&u2).await;
    let mut phone = h.connect(&u1).await;
    for room in [lobby, games] {
        h.send(&mut phone, join(room)).await;
        h.send(&mut observer, join(room)).await;
    }
    let laptop = h.connect(&u1).await;
    observer.drain();

    h.manager.on_disconnect(phone.session).await;
    assert!(observer.drain().is_empty());
    assert!(h.manager.presence().is_online(u1.user_id).await);

    h.manager.on_disconnect(laptop.session).await;
    let notices: Vec<_> = observer
        .drain()
        .into_iter()
        .filter(|event| matches!(event, ServerEvent::UserOffline(n) if n.user_id == u1.user_id))
        .collect();
    assert_eq!(notices.len(), 2);
    assert!(!h.manager.presence().is_online(u1.user_id).await);
    assert!(!h.store.user(u1.user_id).await.unwrap().is_online);
}

#[tokio::test]
async fn leaving_unsubscribes_every_device_and_notifies_room() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut c1 = h.connect(&u1).await;
    let mut c2 = h.connect(&u2).await;
    h.send(&mut c1, join(room)).await;
    h.send(&mut c2, join(room)).await;
    let mut c2_other = h.connect(&u2).await;
    c1.drain();

    h.send(&mut c2, ClientEvent::LeaveRoom(RoomTarget::from(room))).await;

    assert!(!c2.session.is_subscribed(room));
    assert!(!h.manager.broadcaster().is_subscribed(room, c2_other.session.connection_id()).await);
    assert!(!h.manager.membership().is_member(u2.user_id, room).await.unwrap());
    assert_eq!(c1.drain_names(), ["user-left"]);

    h.send(&mut c1, say(room, "still here?")).await;
    assert!(c2.drain().is_empty());
    assert!(c2_other.drain().is_empty());
}

#[tokio::test]
async fn joining_missing_room_reports_error_to_origin_only() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let mut c1 = h.connect(&u1).await;

    h.send(&mut c1, join(RoomId::random())).await;

    match c1.drain().as_slice() {
        [ServerEvent::Error(notice)] => assert!(notice.message.contains("not found")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn unknown_events_are_not_dispatched() {
    let frame = r#"{"event": "self-destruct", "data": {}}"#;
    assert_eq!(
        Inbound::decode(frame),
        Inbound::Unknown("self-destruct".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_verifier_times_out_without_registering() {
    let h = Harness::with(|deps| {
        let verifier: Arc<dyn CredentialVerifier> = Arc::new(StalledVerifier);
        deps.verifier = verifier;
    });
    let (tx, _rx) = mpsc::channel(8);

    let result = h.manager.on_connect(Some("token-slow"), tx).await;

    assert_eq!(result.unwrap_err(), AuthError::Timeout);
    assert_eq!(h.manager.broadcaster().connection_count().await, 0);
}

#[tokio::test]
async fn joining_subscribes_every_device_of_the_user() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let room = h.room("general", &u1, 10).await;
    let mut phone = h.connect(&u1).await;
    let mut laptop = h.connect(&u1).await;

    h.send(&mut phone, join(room)).await;
    h.send(&mut phone, say(room, "hi")).await;

    assert!(h
        .manager
        .broadcaster()
        .is_subscribed(room, laptop.session.connection_id())
        .await);
    assert_eq!(phone.drain_names(), ["new-message"]);
    assert_eq!(laptop.drain_names(), ["user-joined", "new-message"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_from_two_devices_announce_once() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut observer = h.connect(&u2).await;
    h.send(&mut observer, join(room)).await;
    let mut phone = h.connect(&u1).await;
    let mut laptop = h.connect(&u1).await;

    tokio::join!(h.send(&mut phone, join(room)), h.send(&mut laptop, join(room)));

    for client in [&mut phone, &mut laptop] {
        assert!(!client
            .drain()
            .iter()
            .any(|event| matches!(event, ServerEvent::Error(_))));
        assert!(client.session.is_subscribed(room));
    }
    assert_eq!(observer.drain_names(), ["user-joined"]);
    assert_eq!(h.manager.membership().members_of(room).await.unwrap().len(), 2);
}

#[tokio::test]
async fn leaving_twice_announces_once() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut c1 = h.connect(&u1).await;
    let mut c2 = h.connect(&u2).await;
    h.send(&mut c1, join(room)).await;
    h.send(&mut c2, join(room)).await;
    c1.drain();

    let leave = ClientEvent::LeaveRoom(RoomTarget::from(room));
    h.send(&mut c2, leave.clone()).await;
    h.send(&mut c2, leave).await;

    assert_eq!(c1.drain_names(), ["user-left"]);
    assert!(c2.drain().is_empty());
}

#[tokio::test]
async fn reconnect_during_disconnect_suppresses_offline_notice() {
    let gate = Arc::new(std::sync::OnceLock::<Arc<GatedMembers>>::new());
    let h = {
        let gate = gate.clone();
        Harness::with(move |deps| {
            let gated = Arc::new(GatedMembers::new(deps.members.clone()));
            let members: Arc<dyn RoomMemberRepository> = gated.clone();
            deps.members = members;
            let _ = gate.set(gated);
        })
    };
    let gate = gate.get().expect("gated members").clone();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut observer = h.connect(&u2).await;
    let mut phone = h.connect(&u1).await;
    h.send(&mut observer, join(room)).await;
    h.send(&mut phone, join(room)).await;
    observer.drain();

    gate.armed.store(true, Ordering::SeqCst);
    let (_, laptop) = tokio::join!(h.manager.on_disconnect(phone.session), async {
        gate.entered.notified().await;
        let laptop = h.connect(&u1).await;
        gate.release.notify_one();
        laptop
    });

    assert!(laptop.session.is_subscribed(room));
    assert!(h.manager.presence().is_online(u1.user_id).await);
    assert!(observer.drain().is_empty());
}

#[tokio::test]
async fn malformed_frame_is_rejected_to_origin_only() {
    let h = Harness::new();
    let u1 = h.user("u1").await;
    let u2 = h.user("u2").await;
    let room = h.room("general", &u1, 10).await;
    let mut c1 = h.connect(&u1).await;
    let mut c2 = h.connect(&u2).await;
    h.send(&mut c1, join(room)).await;
    h.send(&mut c2, join(room)).await;
    c1.drain();

    let frame = format!(r#"{{"event": "send-message", "data": {{"roomId": "{room}"}}}}"#);
    let Inbound::Malformed(reason) = Inbound::decode(&frame) else {
        panic!("frame should be malformed");
    };
    h.manager.reject_frame(&c1.session, &reason).await;

    match c1.drain().as_slice() {
        [ServerEvent::Error(notice)] => assert!(notice.message.contains("send-message")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(c2.drain().is_empty());
}

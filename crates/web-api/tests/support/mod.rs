use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{InMemoryCredentials, InMemoryStore},
    ChatRoomRepository, ConnectionSessionManager, SessionDependencies, SessionSettings,
    SystemClock, UserRepository,
};
use axum::Router;
use chrono::Utc;
use config::RealtimeConfig;
use domain::{ChatRoom, IdentityContext, RoomId, User, UserId};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryStore>,
    pub credentials: Arc<InMemoryCredentials>,
    pub sessions: Arc<ConnectionSessionManager>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(RealtimeConfig::default()).await
    }

    pub async fn start_with(realtime: RealtimeConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let credentials = Arc::new(InMemoryCredentials::new());
        let sessions = Arc::new(ConnectionSessionManager::new(
            SessionDependencies {
                verifier: credentials.clone(),
                users: store.clone(),
                rooms: store.clone(),
                members: store.clone(),
                messages: store.clone(),
                clock: Arc::new(SystemClock),
            },
            SessionSettings::from(&realtime),
        ));
        sessions.start();

        let app: Router = router(AppState::new(sessions.clone(), realtime));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            credentials,
            sessions,
            shutdown: Some(shutdown_tx),
        }
    }

    /// 创建用户并签发 `token-<name>`
    pub async fn user(&self, name: &str) -> IdentityContext {
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

    pub async fn room(&self, name: &str, creator: &IdentityContext, max_members: u32) -> RoomId {
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

    pub async fn connect(&self, token: Option<&str>) -> WsClient {
        let url = match token {
            Some(token) => format!("ws://{}/api/v1/ws?token={token}", self.addr),
            None => format!("ws://{}/api/v1/ws", self.addr),
        };
        let (client, _) = connect_async(url).await.expect("websocket connect");
        client
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 读取下一个 JSON 事件帧，跳过心跳帧
pub async fn next_event(client: &mut WsClient) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("frame error");
        match frame {
            TungsteniteMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame")
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// 在给定时间内没有任何事件帧
pub async fn assert_silent(client: &mut WsClient, window: Duration) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) =
        tokio::time::timeout(window, client.next()).await
    {
        panic!("unexpected event {text}");
    }
}

/// 等待服务端完成异步处理（订阅、注册）
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

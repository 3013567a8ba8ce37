//! 连接会话管理：握手认证、事件分派、断线清理。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use config::RealtimeConfig;
use domain::{ConnectionId, IdentityContext, RoomId};
use tokio::task::JoinHandle;

use crate::{
    broadcaster::{Outbound, RoomBroadcaster},
    clock::Clock,
    dto::UserSummary,
    error::{ApplicationError, AuthError},
    events::{ClientEvent, MembershipNotice, OfflineNotice, ServerEvent},
    identity::CredentialVerifier,
    membership::RoomMembershipService,
    messaging::MessageBroadcastEngine,
    presence::{PresenceRegistry, PresenceTransition},
    repository::{ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository},
    typing::TypingCoordinator,
};

/// 一条已认证连接的会话，握手成功时创建一次，之后按引用传递
#[derive(Debug, Clone)]
pub struct Session {
    connection_id: ConnectionId,
    identity: IdentityContext,
    subscribed_rooms: HashSet<RoomId>,
}

impl Session {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn subscribed_rooms(&self) -> &HashSet<RoomId> {
        &self.subscribed_rooms
    }

    pub fn is_subscribed(&self, room_id: RoomId) -> bool {
        self.subscribed_rooms.contains(&room_id)
    }
}

/// 外部协作者：凭证校验与存储
#[derive(Clone)]
pub struct SessionDependencies {
    pub verifier: Arc<dyn CredentialVerifier>,
    pub users: Arc<dyn UserRepository>,
    pub rooms: Arc<dyn ChatRoomRepository>,
    pub members: Arc<dyn RoomMemberRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub typing_timeout: Duration,
    pub typing_sweep_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RealtimeConfig::default())
    }
}

impl From<&RealtimeConfig> for SessionSettings {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            typing_timeout: config.typing_timeout(),
            typing_sweep_interval: config.typing_sweep_interval(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

/// 实时引擎的入口，持有全部共享状态并负责其生命周期
pub struct ConnectionSessionManager {
    verifier: Arc<dyn CredentialVerifier>,
    broadcaster: Arc<RoomBroadcaster>,
    presence: Arc<PresenceRegistry>,
    membership: Arc<RoomMembershipService>,
    messaging: Arc<MessageBroadcastEngine>,
    typing: Arc<TypingCoordinator>,
    settings: SessionSettings,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSessionManager {
    pub fn new(deps: SessionDependencies, settings: SessionSettings) -> Self {
        let broadcaster = Arc::new(RoomBroadcaster::new());
        let membership = Arc::new(RoomMembershipService::new(
            deps.rooms.clone(),
            deps.members.clone(),
            deps.clock.clone(),
        ));
        let presence = Arc::new(PresenceRegistry::new(
            deps.users.clone(),
            deps.members.clone(),
            deps.clock.clone(),
        ));
        let messaging = Arc::new(MessageBroadcastEngine::new(
            membership.clone(),
            deps.messages.clone(),
            broadcaster.clone(),
            deps.clock.clone(),
        ));
        let typing = Arc::new(TypingCoordinator::new(
            settings.typing_timeout,
            membership.clone(),
            broadcaster.clone(),
        ));

        Self {
            verifier: deps.verifier,
            broadcaster,
            presence,
            membership,
            messaging,
            typing,
            settings,
            sweeper: Mutex::new(None),
        }
    }

    /// 启动后台清理任务，重复调用无副作用。需要在 tokio 运行时内调用。
    pub fn start(&self) {
        let Ok(mut sweeper) = self.sweeper.lock() else {
            return;
        };
        if sweeper.is_none() {
            *sweeper = Some(self.typing.spawn_sweeper(self.settings.typing_sweep_interval));
            tracing::info!(
                sweep_interval_ms = self.settings.typing_sweep_interval.as_millis() as u64,
                "会话管理器已启动"
            );
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut sweeper) = self.sweeper.lock() {
            if let Some(handle) = sweeper.take() {
                handle.abort();
                tracing::info!("会话管理器已停止");
            }
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn membership(&self) -> &RoomMembershipService {
        &self.membership
    }

    pub fn broadcaster(&self) -> &RoomBroadcaster {
        &self.broadcaster
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    /// 握手：认证失败时不产生任何状态
    pub async fn on_connect(
        &self,
        credential: Option<&str>,
        outbound: Outbound,
    ) -> Result<Session, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::Missing)?;

        let identity = tokio::time::timeout(self.settings.handshake_timeout, self.verifier.verify(token))
            .await
            .map_err(|_| AuthError::Timeout)??;

        let connection_id = ConnectionId::random();
        let user_id = identity.user_id;
        self.broadcaster
            .register(connection_id, user_id, outbound)
            .await;
        self.presence.add_connection(user_id, connection_id).await;

        // 已有成员关系直接订阅，不重新检查容量
        let rooms = match self.membership.rooms_for_user(user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "加载成员关系失败");
                Vec::new()
            }
        };
        let mut subscribed_rooms = HashSet::with_capacity(rooms.len());
        for room_id in rooms {
            if self.broadcaster.subscribe(room_id, connection_id).await {
                subscribed_rooms.insert(room_id);
            }
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            rooms = subscribed_rooms.len(),
            "连接已建立"
        );

        Ok(Session {
            connection_id,
            identity,
            subscribed_rooms,
        })
    }

    /// 分派一个客户端事件。失败只回送给发起连接。
    pub async fn on_event(&self, session: &mut Session, event: ClientEvent) {
        let connection_id = session.connection_id;
        let result = match event {
            ClientEvent::JoinRoom(target) => self.join_room(session, target.room_id()).await,
            ClientEvent::LeaveRoom(target) => self.leave_room(session, target.room_id()).await,
            ClientEvent::SendMessage(payload) => self
                .messaging
                .send(
                    &session.identity,
                    payload.room_id,
                    &payload.content,
                    payload.message_type,
                )
                .await
                .map(|_| ()),
            ClientEvent::TypingStart(payload) => self
                .typing
                .start(&session.identity, connection_id, payload.room_id)
                .await
                .map(|_| ()),
            ClientEvent::TypingStop(payload) => {
                self.typing
                    .stop(&session.identity, connection_id, payload.room_id)
                    .await;
                Ok(())
            }
            ClientEvent::MessageReaction(payload) => {
                self.messaging
                    .react(
                        &session.identity,
                        connection_id,
                        payload.message_id,
                        &payload.reaction,
                    )
                    .await
            }
            ClientEvent::EditMessage(payload) => self
                .messaging
                .edit(&session.identity, payload.message_id, &payload.content)
                .await
                .map(|_| ()),
        };

        if let Err(err) = result {
            tracing::warn!(
                user_id = %session.identity.user_id,
                connection_id = %connection_id,
                error = %err,
                "客户端事件被拒绝"
            );
            self.broadcaster
                .send_to(connection_id, ServerEvent::error(err.client_message()))
                .await;
        }
    }

    /// 已知事件的载荷无法解析时，只向发起连接回送 `error`
    pub async fn reject_frame(&self, session: &Session, reason: &str) {
        tracing::warn!(
            user_id = %session.identity.user_id,
            connection_id = %session.connection_id,
            reason,
            "客户端帧被拒绝"
        );
        self.broadcaster
            .send_to(
                session.connection_id,
                ServerEvent::error(format!("validation failed: {reason}")),
            )
            .await;
    }

    /// 断线清理：最后一条连接断开时向用户所在的每个房间发送一次 `user-offline`
    pub async fn on_disconnect(&self, session: Session) {
        let user_id = session.identity.user_id;
        self.broadcaster.unregister(session.connection_id).await;
        let transition = self
            .presence
            .remove_connection(user_id, session.connection_id)
            .await;

        tracing::info!(
            user_id = %user_id,
            connection_id = %session.connection_id,
            "连接已关闭"
        );

        if transition != PresenceTransition::WentOffline {
            return;
        }

        let rooms = match self.membership.rooms_for_user(user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "加载离线通知房间失败");
                return;
            }
        };
        for room_id in rooms {
            // 加载房间期间用户可能已经重连
            if self.presence.is_online(user_id).await {
                tracing::debug!(user_id = %user_id, "用户已重连，取消离线通知");
                return;
            }
            let event = ServerEvent::UserOffline(OfflineNotice {
                user_id,
                username: session.identity.username.clone(),
            });
            self.broadcaster.emit_to_room(room_id, event, None).await;
        }
    }

    async fn join_room(&self, session: &mut Session, room_id: RoomId) -> Result<(), ApplicationError> {
        let user_id = session.identity.user_id;
        // 成员判定交给房间锁内的 join，同一用户多设备并发加入时只有一次生效
        let newly_joined = match self.membership.join(user_id, room_id).await {
            Ok(_) => true,
            Err(ApplicationError::AlreadyMember { .. }) => false,
            Err(err) => return Err(err),
        };

        // 成员关系即订阅关系，用户的每条在线连接都加入房间
        self.broadcaster.subscribe_user(room_id, user_id).await;
        session.subscribed_rooms.insert(room_id);

        if newly_joined {
            let event = ServerEvent::UserJoined(MembershipNotice {
                user: UserSummary::from(&session.identity),
                message: format!("{} joined the room", session.identity.username),
            });
            self.broadcaster
                .emit_to_room(room_id, event, Some(session.connection_id))
                .await;
        }
        Ok(())
    }

    async fn leave_room(&self, session: &mut Session, room_id: RoomId) -> Result<(), ApplicationError> {
        let user_id = session.identity.user_id;
        let removed = self.membership.leave(user_id, room_id).await?;

        self.broadcaster.unsubscribe_user(room_id, user_id).await;
        session.subscribed_rooms.remove(&room_id);

        if removed {
            let event = ServerEvent::UserLeft(MembershipNotice {
                user: UserSummary::from(&session.identity),
                message: format!("{} left the room", session.identity.username),
            });
            self.broadcaster.emit_to_room(room_id, event, None).await;
        }
        Ok(())
    }
}

impl Drop for ConnectionSessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

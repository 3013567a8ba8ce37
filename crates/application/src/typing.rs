use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use domain::{ConnectionId, IdentityContext, RoomId, UserId};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};

use crate::{
    broadcaster::RoomBroadcaster,
    error::ApplicationError,
    events::{ServerEvent, StopTypingNotice, TypingNotice},
    membership::RoomMembershipService,
};

/// 房间内“正在输入”状态，只存在于内存中。
///
/// 过期的条目视为已经停止：查询时惰性判断，后台任务定期清理。过期不会广播
/// `user-stop-typing`。
pub struct TypingCoordinator {
    timeout: Duration,
    states: Mutex<HashMap<(RoomId, UserId), Instant>>,
    membership: Arc<RoomMembershipService>,
    broadcaster: Arc<RoomBroadcaster>,
}

impl TypingCoordinator {
    pub fn new(
        timeout: Duration,
        membership: Arc<RoomMembershipService>,
        broadcaster: Arc<RoomBroadcaster>,
    ) -> Self {
        Self {
            timeout,
            states: Mutex::new(HashMap::new()),
            membership,
            broadcaster,
        }
    }

    /// 返回是否广播了 `user-typing`
    pub async fn start(
        &self,
        identity: &IdentityContext,
        origin: ConnectionId,
        room_id: RoomId,
    ) -> Result<bool, ApplicationError> {
        let user_id = identity.user_id;
        self.membership.require_member(user_id, room_id).await?;

        let now = Instant::now();
        let armed = {
            let mut states = self.states.lock().await;
            let previous = states.insert((room_id, user_id), now + self.timeout);
            !matches!(previous, Some(expires_at) if expires_at > now)
        };

        if armed {
            let event = ServerEvent::UserTyping(TypingNotice {
                user_id,
                username: identity.username.clone(),
                room_id,
            });
            self.broadcaster
                .emit_to_room(room_id, event, Some(origin))
                .await;
            tracing::debug!(room_id = %room_id, user_id = %user_id, "开始输入");
        }
        Ok(armed)
    }

    /// 返回是否广播了 `user-stop-typing`
    pub async fn stop(
        &self,
        identity: &IdentityContext,
        origin: ConnectionId,
        room_id: RoomId,
    ) -> bool {
        let user_id = identity.user_id;
        let was_active = {
            let mut states = self.states.lock().await;
            matches!(
                states.remove(&(room_id, user_id)),
                Some(expires_at) if expires_at > Instant::now()
            )
        };

        if was_active {
            let event = ServerEvent::UserStopTyping(StopTypingNotice { user_id, room_id });
            self.broadcaster
                .emit_to_room(room_id, event, Some(origin))
                .await;
            tracing::debug!(room_id = %room_id, user_id = %user_id, "停止输入");
        }
        was_active
    }

    pub async fn is_typing(&self, room_id: RoomId, user_id: UserId) -> bool {
        let states = self.states.lock().await;
        states
            .get(&(room_id, user_id))
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }

    pub async fn typing_users(&self, room_id: RoomId) -> Vec<UserId> {
        let now = Instant::now();
        let states = self.states.lock().await;
        states
            .iter()
            .filter(|((room, _), expires_at)| *room == room_id && **expires_at > now)
            .map(|((_, user), _)| *user)
            .collect()
    }

    /// 清理过期条目，返回清理数量
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, expires_at| *expires_at > now);
        before - states.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                let reaped = coordinator.sweep().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "已清理过期的输入状态");
                }
            }
        })
    }
}

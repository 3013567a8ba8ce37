use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{ConnectionId, RoomId, UserId};
use tokio::sync::RwLock;

use crate::{
    clock::Clock,
    error::ApplicationError,
    locks::KeyedLocks,
    repository::{RoomMemberRepository, UserRepository},
};

/// 只有“空 → 非空”和“非空 → 空”两种可观察的在线状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    WentOffline,
    Unchanged,
}

/// 在线状态注册表：用户 → 在线连接集合。
///
/// 同一用户的增删在用户锁内串行执行，存储侧的 `update_presence` 也在锁内完成，
/// 快速重连时不会出现“先写在线、后写离线”的乱序。
pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, HashSet<ConnectionId>>>,
    user_locks: KeyedLocks<UserId>,
    users: Arc<dyn UserRepository>,
    members: Arc<dyn RoomMemberRepository>,
    clock: Arc<dyn Clock>,
}

impl PresenceRegistry {
    pub fn new(
        users: Arc<dyn UserRepository>,
        members: Arc<dyn RoomMemberRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            user_locks: KeyedLocks::new(),
            users,
            members,
            clock,
        }
    }

    pub async fn add_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> PresenceTransition {
        let _guard = self.user_locks.lock(&user_id).await;

        let transition = {
            let mut connections = self.connections.write().await;
            let set = connections.entry(user_id).or_default();
            let was_empty = set.is_empty();
            set.insert(connection_id);
            if was_empty {
                PresenceTransition::CameOnline
            } else {
                PresenceTransition::Unchanged
            }
        };

        // lastSeen 每次连接都刷新
        self.persist(user_id, true).await;
        if transition == PresenceTransition::CameOnline {
            tracing::info!(user_id = %user_id, "用户上线");
        }
        transition
    }

    pub async fn remove_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> PresenceTransition {
        let _guard = self.user_locks.lock(&user_id).await;

        let transition = {
            let mut connections = self.connections.write().await;
            let removed = connections
                .get_mut(&user_id)
                .is_some_and(|set| set.remove(&connection_id));
            let drained = connections.get(&user_id).is_some_and(HashSet::is_empty);
            if removed && drained {
                connections.remove(&user_id);
                PresenceTransition::WentOffline
            } else {
                PresenceTransition::Unchanged
            }
        };

        if transition == PresenceTransition::WentOffline {
            self.persist(user_id, false).await;
            tracing::info!(user_id = %user_id, "用户离线");
        }
        transition
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections
            .read()
            .await
            .get(&user_id)
            .is_some_and(|set| !set.is_empty())
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// 房间成员与在线用户的交集大小
    pub async fn online_count(&self, room_id: RoomId) -> Result<usize, ApplicationError> {
        let members = self.members.list_members(room_id).await?;
        let connections = self.connections.read().await;
        Ok(members
            .iter()
            .filter(|member| connections.contains_key(&member.user_id))
            .count())
    }

    async fn persist(&self, user_id: UserId, is_online: bool) {
        let now = self.clock.now();
        if let Err(err) = self.users.update_presence(user_id, is_online, now).await {
            tracing::warn!(user_id = %user_id, is_online, error = %err, "在线状态持久化失败");
        }
    }
}

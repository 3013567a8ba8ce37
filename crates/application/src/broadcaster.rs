//! 进程内广播域：房间 → 已订阅的在线连接。
//!
//! 每条连接在握手成功后注册一个出站队列，房间事件通过 `try_send` 写入各连接的队列，
//! 永远不会因为某个慢连接阻塞调用方。

use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, RoomId, UserId};
use tokio::sync::{mpsc, RwLock};

use crate::events::ServerEvent;

pub type Outbound = mpsc::Sender<ServerEvent>;

struct ConnectionEntry {
    user_id: UserId,
    sender: Outbound,
}

#[derive(Default)]
struct BroadcastState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl BroadcastState {
    fn detach(&mut self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let Some(subscribers) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = subscribers.remove(&connection_id);
        if subscribers.is_empty() {
            self.rooms.remove(&room_id);
        }
        removed
    }
}

#[derive(Default)]
pub struct RoomBroadcaster {
    state: RwLock<BroadcastState>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: ConnectionId, user_id: UserId, sender: Outbound) {
        let mut state = self.state.write().await;
        state
            .connections
            .insert(connection_id, ConnectionEntry { user_id, sender });
    }

    /// 注销连接并退出它订阅的所有房间
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut state = self.state.write().await;
        state.connections.remove(&connection_id);
        state.rooms.retain(|_, subscribers| {
            subscribers.remove(&connection_id);
            !subscribers.is_empty()
        });
    }

    /// 连接未注册时返回 false
    pub async fn subscribe(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let mut state = self.state.write().await;
        if !state.connections.contains_key(&connection_id) {
            return false;
        }
        state.rooms.entry(room_id).or_default().insert(connection_id);
        true
    }

    pub async fn unsubscribe(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        self.state.write().await.detach(room_id, connection_id)
    }

    /// 让某用户当前所有在线连接订阅房间，返回新加入的连接数
    pub async fn subscribe_user(&self, room_id: RoomId, user_id: UserId) -> usize {
        let mut state = self.state.write().await;
        let owned: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();
        if owned.is_empty() {
            return 0;
        }
        let subscribers = state.rooms.entry(room_id).or_default();
        owned
            .into_iter()
            .filter(|connection_id| subscribers.insert(*connection_id))
            .count()
    }

    /// 让某用户的所有连接退出房间，返回受影响的连接数
    pub async fn unsubscribe_user(&self, room_id: RoomId, user_id: UserId) -> usize {
        let mut state = self.state.write().await;
        let owned: Vec<ConnectionId> = state
            .connections
            .iter()
            .filter(|(_, entry)| entry.user_id == user_id)
            .map(|(id, _)| *id)
            .collect();
        owned
            .into_iter()
            .filter(|connection_id| state.detach(room_id, *connection_id))
            .count()
    }

    pub async fn is_subscribed(&self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(&room_id)
            .is_some_and(|subscribers| subscribers.contains(&connection_id))
    }

    pub async fn subscriber_count(&self, room_id: RoomId) -> usize {
        self.state
            .read()
            .await
            .rooms
            .get(&room_id)
            .map_or(0, HashSet::len)
    }

    /// 向房间所有订阅者扇出，`except` 指定的连接除外。返回成功入队的连接数。
    pub async fn emit_to_room(
        &self,
        room_id: RoomId,
        event: ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let state = self.state.read().await;
        let Some(subscribers) = state.rooms.get(&room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for connection_id in subscribers {
            if Some(*connection_id) == except {
                continue;
            }
            let Some(entry) = state.connections.get(connection_id) else {
                continue;
            };
            match entry.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    tracing::warn!(
                        room_id = %room_id,
                        connection_id = %connection_id,
                        event = event.name(),
                        error = %err,
                        "扇出到连接失败"
                    );
                }
            }
        }
        delivered
    }

    /// 只发给单条连接，用于 `error` 之类的定向事件
    pub async fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let state = self.state.read().await;
        let Some(entry) = state.connections.get(&connection_id) else {
            return false;
        };
        entry.sender.try_send(event).is_ok()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

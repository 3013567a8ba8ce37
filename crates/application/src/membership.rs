use std::sync::Arc;

use domain::{ChatRoom, RepositoryError, RoomId, RoomMember, UserId};

use crate::{
    clock::Clock,
    error::ApplicationError,
    locks::KeyedLocks,
    repository::{ChatRoomRepository, RoomMemberRepository},
};

/// 房间成员关系的唯一修改入口，也是房间访问控制的唯一判定点。
///
/// 每个房间的“检查容量 + 插入”在同一把房间锁内完成，两个并发加入不可能同时通过容量检查。
pub struct RoomMembershipService {
    rooms: Arc<dyn ChatRoomRepository>,
    members: Arc<dyn RoomMemberRepository>,
    clock: Arc<dyn Clock>,
    room_locks: KeyedLocks<RoomId>,
}

impl RoomMembershipService {
    pub fn new(
        rooms: Arc<dyn ChatRoomRepository>,
        members: Arc<dyn RoomMemberRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rooms,
            members,
            clock,
            room_locks: KeyedLocks::new(),
        }
    }

    pub async fn find_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        self.rooms
            .find_by_id(room_id)
            .await?
            .ok_or(ApplicationError::RoomNotFound { room_id })
    }

    pub async fn join(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<RoomMember, ApplicationError> {
        let _guard = self.room_locks.lock(&room_id).await;

        let room = self.find_room(room_id).await?;

        if self.members.find(room_id, user_id).await?.is_some() {
            return Err(ApplicationError::AlreadyMember { room_id });
        }

        let current = self.members.count_members(room_id).await?;
        if !room.has_room_for(current) {
            return Err(ApplicationError::RoomFull { room_id });
        }

        let member = RoomMember::new(room_id, user_id, self.clock.now());
        let member = self.members.insert(member).await.map_err(|err| match err {
            // 其它进程抢先写入了同一条记录
            RepositoryError::Conflict => ApplicationError::AlreadyMember { room_id },
            other => ApplicationError::Persistence(other),
        })?;

        tracing::info!(room_id = %room_id, user_id = %user_id, members = current + 1, "用户加入房间");
        Ok(member)
    }

    /// 非成员离开是幂等的；房间不存在才报错。返回是否真的移除了成员关系。
    pub async fn leave(&self, user_id: UserId, room_id: RoomId) -> Result<bool, ApplicationError> {
        let _guard = self.room_locks.lock(&room_id).await;

        self.find_room(room_id).await?;
        let removed = self.members.remove(room_id, user_id).await?;

        if removed {
            tracing::info!(room_id = %room_id, user_id = %user_id, "用户离开房间");
        } else {
            tracing::debug!(room_id = %room_id, user_id = %user_id, "非成员离开，忽略");
        }
        Ok(removed)
    }

    pub async fn is_member(&self, user_id: UserId, room_id: RoomId) -> Result<bool, ApplicationError> {
        Ok(self.members.find(room_id, user_id).await?.is_some())
    }

    /// 房间范围操作前的统一校验
    pub async fn require_member(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<(), ApplicationError> {
        if self.is_member(user_id, room_id).await? {
            Ok(())
        } else {
            Err(ApplicationError::NotMember { room_id })
        }
    }

    pub async fn rooms_for_user(&self, user_id: UserId) -> Result<Vec<RoomId>, ApplicationError> {
        Ok(self.members.list_rooms_for_user(user_id).await?)
    }

    pub async fn members_of(&self, room_id: RoomId) -> Result<Vec<RoomMember>, ApplicationError> {
        Ok(self.members.list_members(room_id).await?)
    }
}

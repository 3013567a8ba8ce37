use std::sync::Arc;

use domain::{
    ConnectionId, IdentityContext, MessageContent, MessageId, MessageType, NewMessage, RoomId,
};

use crate::{
    broadcaster::RoomBroadcaster,
    clock::Clock,
    dto::{MessageDto, UserSummary},
    error::ApplicationError,
    events::{ReactionNotice, ServerEvent},
    locks::KeyedLocks,
    membership::RoomMembershipService,
    repository::MessageRepository,
};

/// 校验、持久化并扇出聊天消息。
///
/// 同一房间内“写入 + 扇出”串行执行，订阅者看到的顺序与提交顺序一致。
/// 写入失败时不扇出任何内容。
pub struct MessageBroadcastEngine {
    membership: Arc<RoomMembershipService>,
    messages: Arc<dyn MessageRepository>,
    broadcaster: Arc<RoomBroadcaster>,
    clock: Arc<dyn Clock>,
    room_locks: KeyedLocks<RoomId>,
}

impl MessageBroadcastEngine {
    pub fn new(
        membership: Arc<RoomMembershipService>,
        messages: Arc<dyn MessageRepository>,
        broadcaster: Arc<RoomBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            membership,
            messages,
            broadcaster,
            clock,
            room_locks: KeyedLocks::new(),
        }
    }

    /// 发送者自己的连接同样会收到 `new-message`
    pub async fn send(
        &self,
        identity: &IdentityContext,
        room_id: RoomId,
        content: &str,
        message_type: MessageType,
    ) -> Result<MessageDto, ApplicationError> {
        let content = MessageContent::new(content)?;
        self.membership.find_room(room_id).await?;
        self.membership
            .require_member(identity.user_id, room_id)
            .await?;

        let _guard = self.room_locks.lock(&room_id).await;

        let draft = NewMessage {
            room_id,
            sender_id: identity.user_id,
            content,
            message_type,
        };
        let message = self.messages.create(draft).await.map_err(|err| {
            tracing::error!(room_id = %room_id, user_id = %identity.user_id, error = %err, "消息持久化失败");
            ApplicationError::Persistence(err)
        })?;

        let dto = MessageDto::new(&message, UserSummary::from(identity));
        let delivered = self
            .broadcaster
            .emit_to_room(room_id, ServerEvent::NewMessage(dto.clone()), None)
            .await;

        tracing::info!(
            room_id = %room_id,
            message_id = %message.id,
            sender_id = %identity.user_id,
            delivered,
            "消息已广播"
        );
        Ok(dto)
    }

    /// 只有原发送者可以编辑，且仍须是房间成员
    pub async fn edit(
        &self,
        identity: &IdentityContext,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessageDto, ApplicationError> {
        let mut message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(ApplicationError::MessageNotFound)?;
        let room_id = message.room_id;

        if message.sender_id != identity.user_id {
            return Err(ApplicationError::Forbidden(
                "only the sender may edit a message".to_string(),
            ));
        }
        self.membership
            .require_member(identity.user_id, room_id)
            .await?;

        let content = MessageContent::new(content)?;
        message.edit(identity.user_id, content, self.clock.now())?;

        let _guard = self.room_locks.lock(&room_id).await;
        let message = self.messages.update(message).await?;

        let dto = MessageDto::new(&message, UserSummary::from(identity));
        self.broadcaster
            .emit_to_room(room_id, ServerEvent::MessageEdited(dto.clone()), None)
            .await;

        tracing::info!(room_id = %room_id, message_id = %message_id, "消息已编辑");
        Ok(dto)
    }

    /// 表情回应只做转发，不持久化
    pub async fn react(
        &self,
        identity: &IdentityContext,
        origin: ConnectionId,
        message_id: MessageId,
        reaction: &str,
    ) -> Result<(), ApplicationError> {
        let reaction = reaction.trim();
        if reaction.is_empty() {
            return Err(ApplicationError::validation("reaction: must not be empty"));
        }

        let message = self
            .messages
            .find_by_id(message_id)
            .await?
            .ok_or(ApplicationError::MessageNotFound)?;
        self.membership
            .require_member(identity.user_id, message.room_id)
            .await?;

        let event = ServerEvent::MessageReaction(ReactionNotice {
            message_id,
            reaction: reaction.to_string(),
            user_id: identity.user_id,
            username: identity.username.clone(),
        });
        self.broadcaster
            .emit_to_room(message.room_id, event, Some(origin))
            .await;
        Ok(())
    }
}

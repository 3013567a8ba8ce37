//! 聊天室系统核心领域模型
//!
//! 包含用户、聊天室、成员关系、消息等核心实体，以及连接身份的值对象。

pub mod chat_room;
pub mod errors;
pub mod identity;
pub mod message;
pub mod room_member;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_room::ChatRoom;
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use identity::IdentityContext;
pub use message::{Message, MessageType, NewMessage};
pub use room_member::RoomMember;
pub use user::User;
pub use value_objects::{ConnectionId, MessageContent, MessageId, RoomId, Timestamp, UserId};

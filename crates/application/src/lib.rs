//! 应用层实现。
//!
//! 实时会话与房间广播引擎：连接认证、在线状态、成员关系校验、
//! 消息扇出以及输入状态协调。存储与凭证校验通过本层定义的 trait 交给外部适配器。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod events;
pub mod identity;
pub mod locks;
pub mod membership;
pub mod memory;
pub mod messaging;
pub mod presence;
pub mod repository;
pub mod session;
pub mod typing;

pub use broadcaster::RoomBroadcaster;
pub use clock::{Clock, SystemClock};
pub use dto::{MessageDto, UserSummary};
pub use error::{ApplicationError, AuthError};
pub use events::{ClientEvent, Inbound, ServerEvent};
pub use identity::CredentialVerifier;
pub use membership::RoomMembershipService;
pub use messaging::MessageBroadcastEngine;
pub use presence::{PresenceRegistry, PresenceTransition};
pub use repository::{ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository};
pub use session::{ConnectionSessionManager, Session, SessionDependencies, SessionSettings};
pub use typing::TypingCoordinator;

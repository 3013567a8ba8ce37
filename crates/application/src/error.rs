use domain::{DomainError, RepositoryError, RoomId};
use thiserror::Error;

/// 房间范围内操作的失败原因，只回送给触发它的连接。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("not a member of room {room_id}")]
    NotMember { room_id: RoomId },
    #[error("room {room_id} not found")]
    RoomNotFound { room_id: RoomId },
    #[error("room {room_id} is full")]
    RoomFull { room_id: RoomId },
    #[error("already a member of room {room_id}")]
    AlreadyMember { room_id: RoomId },
    #[error("message not found")]
    MessageNotFound,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("persistence error: {0}")]
    Persistence(RepositoryError),
}

impl ApplicationError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    /// 回送给客户端的 `error{message}` 文本
    pub fn client_message(&self) -> String {
        match self {
            // 存储细节不外泄
            ApplicationError::Persistence(_) => "storage unavailable, please retry".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value)
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument { field, reason } => {
                ApplicationError::Validation(format!("{field}: {reason}"))
            }
            DomainError::OperationNotAllowed => {
                ApplicationError::Forbidden("operation not allowed".to_string())
            }
        }
    }
}

/// 握手失败。连接被拒绝，不产生任何状态。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("authentication token required")]
    Missing,
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("authentication timed out")]
    Timeout,
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing",
            AuthError::Invalid => "invalid",
            AuthError::Expired => "expired",
            AuthError::Timeout => "timeout",
        }
    }
}

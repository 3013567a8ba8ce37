use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let message = error.client_message();
        match error {
            ApplicationError::RoomNotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, "ROOM_NOT_FOUND", message)
            }
            ApplicationError::MessageNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND", message)
            }
            ApplicationError::NotMember { .. } => {
                ApiError::new(StatusCode::FORBIDDEN, "NOT_ROOM_MEMBER", message)
            }
            ApplicationError::Forbidden(_) => {
                ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
            }
            ApplicationError::RoomFull { .. } => {
                ApiError::new(StatusCode::CONFLICT, "ROOM_FULL", message)
            }
            ApplicationError::AlreadyMember { .. } => {
                ApiError::new(StatusCode::CONFLICT, "MEMBERSHIP_EXISTS", message)
            }
            ApplicationError::Validation(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", message)
            }
            ApplicationError::Persistence(err) => {
                tracing::error!(error = %err, "处理请求时存储失败");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

//! Web API 层。
//!
//! 提供 Axum 路由：健康检查、房间在线人数查询，以及把 WebSocket 连接交给
//! 应用层会话管理器的连接驱动。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

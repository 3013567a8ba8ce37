//! 基础设施层：PostgreSQL 存储与 JWT 凭证校验

pub mod auth;
pub mod repository;

pub use auth::{Claims, JwtCredentialVerifier};
pub use repository::{create_pg_pool, PgStore};

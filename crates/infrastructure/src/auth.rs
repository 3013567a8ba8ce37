//! JWT 凭证校验
//!
//! HS256 签名，claims 只包含 `user_id` 与 `exp`。

use std::sync::Arc;

use application::{AuthError, CredentialVerifier, UserRepository};
use async_trait::async_trait;
use config::JwtConfig;
use domain::{IdentityContext, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// 校验令牌并从用户存储中解析出连接身份
#[derive(Clone)]
pub struct JwtCredentialVerifier {
    expiration_hours: i64,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    users: Arc<dyn UserRepository>,
}

impl JwtCredentialVerifier {
    pub fn new(config: &JwtConfig, users: Arc<dyn UserRepository>) -> Self {
        Self {
            expiration_hours: config.expiration_hours,
            encoding_key: EncodingKey::from_secret(config.secret.as_ref()),
            decoding_key: DecodingKey::from_secret(config.secret.as_ref()),
            users,
        }
    }

    /// 签发令牌（运维工具和测试使用）
    pub fn issue_token(&self, user_id: UserId) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.expiration_hours);
        self.issue_token_expiring_at(user_id, exp.timestamp())
    }

    pub fn issue_token_expiring_at(
        &self,
        user_id: UserId,
        exp: i64,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id: user_id.into(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    tracing::debug!(error = %err, "令牌校验失败");
                    AuthError::Invalid
                }
            })
    }
}

#[async_trait]
impl CredentialVerifier for JwtCredentialVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityContext, AuthError> {
        let claims = self.decode_claims(token)?;
        let user_id = UserId::from(claims.user_id);

        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => Ok(IdentityContext::new(user.id, user.username)),
            Ok(None) => {
                tracing::warn!(user_id = %user_id, "令牌对应的用户不存在");
                Err(AuthError::Invalid)
            }
            Err(err) => {
                tracing::error!(user_id = %user_id, error = %err, "握手时查询用户失败");
                Err(AuthError::Invalid)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::memory::InMemoryStore;
    use domain::User;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-that-is-long-enough-for-hs256".to_string(),
            expiration_hours: 1,
        }
    }

    async fn verifier_with_user(name: &str) -> (JwtCredentialVerifier, UserId) {
        let store = Arc::new(InMemoryStore::new());
        let user = User::new(UserId::random(), name);
        let user_id = user.id;
        UserRepository::create(store.as_ref(), user).await.unwrap();
        (JwtCredentialVerifier::new(&config(), store), user_id)
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let (verifier, user_id) = verifier_with_user("alice").await;
        let token = verifier.issue_token(user_id).unwrap();

        let identity = verifier.verify(&token).await.unwrap();

        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.username, "alice");
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let (verifier, user_id) = verifier_with_user("alice").await;
        let past = chrono::Utc::now().timestamp() - 3600;
        let token = verifier.issue_token_expiring_at(user_id, past).unwrap();

        assert_eq!(verifier.verify(&token).await.unwrap_err(), AuthError::Expired);
    }

    #[tokio::test]
    async fn garbage_and_foreign_tokens_are_invalid() {
        let (verifier, user_id) = verifier_with_user("alice").await;
        assert_eq!(verifier.verify("not.a.jwt").await.unwrap_err(), AuthError::Invalid);

        let foreign = JwtCredentialVerifier::new(
            &JwtConfig {
                secret: "another-secret-key-that-is-long-enough-too".to_string(),
                expiration_hours: 1,
            },
            Arc::new(InMemoryStore::new()),
        );
        let token = foreign.issue_token(user_id).unwrap();
        assert_eq!(verifier.verify(&token).await.unwrap_err(), AuthError::Invalid);
    }

    #[tokio::test]
    async fn token_for_unknown_user_is_invalid() {
        let (verifier, _) = verifier_with_user("alice").await;
        let token = verifier.issue_token(UserId::random()).unwrap();

        assert_eq!(verifier.verify(&token).await.unwrap_err(), AuthError::Invalid);
    }
}

use async_trait::async_trait;
use domain::IdentityContext;

use crate::error::AuthError;

/// 凭证校验协作方：把握手时提交的不透明令牌解析为身份。
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<IdentityContext, AuthError>;
}

//! Abstract secret port for per-session passwords. Backed by the OS
//! keychain on real hosts; secrets are scoped to the process owner and
//! survive restarts.

use async_trait::async_trait;

/// Opaque secret-storage failure, propagated as-is.
#[derive(Debug, Clone, thiserror::Error)]
#[error("secret store: {0}")]
pub struct SecretError(pub String);

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store_password(&self, key: &str, secret: &str) -> Result<(), SecretError>;
    async fn retrieve_password(&self, key: &str) -> Result<Option<String>, SecretError>;
    async fn delete_password(&self, key: &str) -> Result<(), SecretError>;
}

use domain::RepositoryError;
use thiserror::Error;

use crate::registry::RegistryError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApplicationError {
    /// 持久化失败只影响当前这条消息，会话可以继续
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ApplicationError::Repository(_))
    }
}

use async_trait::async_trait;

use crate::errors::RepositoryResult;
use crate::message::Message;

/// 仅追加的消息存储
///
/// 实现必须保证并发调用 `append` 时分配的 ID 严格递增且互不重复，
/// 返回时消息已持久化。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 持久化一条消息，由存储分配 ID 与时间戳
    async fn append(&self, username: &str, content: &str) -> RepositoryResult<Message>;

    /// 按 `created_at` 升序（同一时刻按 ID）返回全部消息
    async fn list_all(&self) -> RepositoryResult<Vec<Message>>;
}

use std::sync::Arc;

use application::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Message, MessageId, MessageStore, RepositoryError, RepositoryResult};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    username: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        // 空白内容不会被写入，读到说明数据被外部改动过
        if value.content.trim().is_empty() {
            return Err(RepositoryError::invalid_data(format!(
                "message {} has blank content",
                value.id
            )));
        }

        Ok(Message::new(
            MessageId::from(value.id),
            value.username,
            value.content,
            value.created_at,
        ))
    }
}

/// 基于 PostgreSQL 的消息存储
///
/// ID 由 `BIGSERIAL` 分配；时间戳取自注入的时钟，以便与 ID 保持同序。
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_clock(pool, Arc::new(SystemClock))
    }

    pub fn with_clock(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, username: &str, content: &str) -> RepositoryResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (username, content, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, username, content, created_at
            "#,
        )
        .bind(username)
        .bind(content)
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.try_into()
    }

    async fn list_all(&self) -> RepositoryResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"SELECT id, username, content, created_at FROM messages ORDER BY created_at ASC, id ASC"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

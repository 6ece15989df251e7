// 进程内消息存储，用于测试和本地调试
use std::sync::Arc;

use async_trait::async_trait;
use domain::{Message, MessageId, MessageStore, RepositoryResult};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};

pub struct InMemoryMessageStore {
    clock: Arc<dyn Clock>,
    messages: Mutex<Vec<Message>>,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, username: &str, content: &str) -> RepositoryResult<Message> {
        let mut messages = self.messages.lock().await;
        // ID 在锁内分配，与 BIGSERIAL 一样从 1 开始
        let id = MessageId::new(messages.len() as i64 + 1);
        let message = Message::new(id, username, content, self.clock.now());
        messages.push(message.clone());
        Ok(message)
    }

    async fn list_all(&self) -> RepositoryResult<Vec<Message>> {
        let mut messages = self.messages.lock().await.clone();
        messages.sort_by_key(|message| (message.created_at, message.id));
        Ok(messages)
    }
}

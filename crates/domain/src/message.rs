//! 消息实体定义
//!
//! 包含持久化后的聊天消息，以及客户端入站载荷的解析与规范化规则。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MessageId, Timestamp};

/// 未提供用户名时使用的默认显示名
pub const ANONYMOUS_USERNAME: &str = "Anonymous";

/// 用户名最大字符数，与数据库列宽一致
pub const MAX_USERNAME_CHARS: usize = 100;

/// 已持久化的聊天消息
///
/// 序列化结果即广播给客户端、以及历史接口返回的 JSON 结构：
/// `{"id", "username", "content", "created_at"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// 存储层分配的自增ID
    pub id: MessageId,
    /// 发送者显示名
    pub username: String,
    /// 消息正文
    pub content: String,
    /// 持久化时间（UTC）
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(
        id: MessageId,
        username: impl Into<String>,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            content: content.into(),
            created_at,
        }
    }
}

/// 客户端发送的原始 JSON 载荷
///
/// 两个字段都允许缺失或为 `null`，未知字段会被忽略。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InboundPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl InboundPayload {
    /// 解析一帧文本；不是 JSON 对象时返回 `MalformedPayload`
    pub fn parse(raw: &str) -> DomainResult<Self> {
        serde_json::from_str(raw).map_err(|err| DomainError::malformed_payload(err.to_string()))
    }

    /// 转换为待持久化的消息；正文去除空白后为空时返回 `None`
    pub fn into_new_message(self) -> Option<NewMessage> {
        NewMessage::new(self.username, self.content.unwrap_or_default())
    }
}

/// 通过校验、等待持久化的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    username: String,
    content: String,
}

impl NewMessage {
    pub fn new(username: Option<String>, content: String) -> Option<Self> {
        if content.trim().is_empty() {
            return None;
        }

        Some(Self {
            username: normalize_username(username),
            content,
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

fn normalize_username(username: Option<String>) -> String {
    let trimmed = username.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return ANONYMOUS_USERNAME.to_string();
    }

    if trimmed.chars().count() > MAX_USERNAME_CHARS {
        trimmed.chars().take(MAX_USERNAME_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}

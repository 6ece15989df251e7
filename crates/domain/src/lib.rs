//! 聊天中继核心领域模型
//!
//! 包含消息实体、入站载荷的校验规则，以及存储接口定义。

pub mod errors;
pub mod message;
pub mod repository;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::{InboundPayload, Message, NewMessage, ANONYMOUS_USERNAME, MAX_USERNAME_CHARS};
pub use repository::MessageStore;
#[cfg(any(test, feature = "testing"))]
pub use repository::MockMessageStore;
pub use value_objects::{ConnectionId, MessageId, Timestamp};

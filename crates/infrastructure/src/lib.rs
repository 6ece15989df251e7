//! 基础设施层实现。
//!
//! 提供 PostgreSQL 消息存储与数据库迁移，实现领域层定义的存储接口。

pub mod migrations;
pub mod repository;

pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageStore};

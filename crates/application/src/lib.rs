//! 应用层实现。
//!
//! 这里是聊天中继的核心：连接注册表、广播协调器以及单连接会话循环，
//! 并提供进程内消息存储供测试和本地运行使用。

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod registry;
pub mod session;

pub use clock::{Clock, SystemClock};
pub use coordinator::{BroadcastCoordinator, BroadcastReport, IgnoreReason, InboundOutcome};
pub use error::ApplicationError;
pub use memory::InMemoryMessageStore;
pub use registry::{
    ConnectionHandle, ConnectionRegistry, DeliveryError, OutboundFrame, RegistryError,
};
pub use session::{
    CloseReason, InboundChannel, OutboundChannel, ReceiveOutcome, Session, SessionState,
    SessionSummary, TransportError,
};

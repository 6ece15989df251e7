//! 连接注册表
//!
//! 记录当前在线的所有连接句柄。句柄只持有会话出站队列的发送端，
//! 连接本身（套接字和接收端）始终归会话所有。

use std::collections::HashMap;
use std::sync::Arc;

use domain::ConnectionId;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Notify, RwLock};

/// 已序列化的出站帧，同一条广播在所有连接间共享
pub type OutboundFrame = Arc<str>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// 单个连接投递失败的原因
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// 出站队列已满，客户端消费过慢
    #[error("outbound queue is saturated")]
    Saturated,
    /// 会话已结束，接收端被释放
    #[error("connection is closed")]
    Closed,
}

/// 指向某个会话出站队列的句柄
///
/// 除发送端外还带一个驱逐信号：写任务可能卡在套接字写入上，
/// 仅释放发送端无法让会话及时结束。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<OutboundFrame>,
    eviction: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id,
            outbound,
            eviction: Arc::new(Notify::new()),
        }
    }

    /// 创建句柄以及对应的有界出站队列，接收端交给会话持有
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 非阻塞投递；队列满或已关闭时立即返回错误
    pub fn deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::Saturated,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// 通知持有该连接的会话立即结束；会话尚未等待时信号会被保留
    pub fn evict(&self) {
        self.eviction.notify_one();
    }

    /// 会话用来等待驱逐的信号
    pub fn eviction_signal(&self) -> Arc<Notify> {
        self.eviction.clone()
    }
}

/// 线程安全的在线连接集合
///
/// 克隆开销很小，所有克隆共享同一份状态。
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接
    pub async fn add(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(&handle.id) {
            return Err(RegistryError::AlreadyRegistered(handle.id));
        }

        tracing::debug!(connection_id = %handle.id, "连接已注册");
        connections.insert(handle.id, handle);
        Ok(())
    }

    /// 注销连接；重复注销或未知ID不会报错，返回是否真的移除了句柄
    pub async fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "连接已注销");
        }
        removed
    }

    /// 获取当前时刻的连接快照，之后的增删不会影响已取得的快照
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

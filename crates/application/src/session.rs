//! 单连接会话
//!
//! 会话负责一个客户端从握手完成到断开的整个生命周期：
//! 注册句柄、循环接收入站载荷并交给协调器、把出站队列写回客户端，
//! 结束时从注册表注销。传输层通过 [`InboundChannel`] 与 [`OutboundChannel`] 抽象。

use std::sync::Arc;

use async_trait::async_trait;
use domain::ConnectionId;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::coordinator::{BroadcastCoordinator, InboundOutcome};
use crate::registry::{ConnectionHandle, ConnectionRegistry, OutboundFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// 一次接收的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// 一条待处理的文本载荷
    Payload(String),
    /// 控制帧等无需处理的内容
    Ignored,
    /// 无法解码的单帧，丢弃后继续
    Malformed(String),
    /// 客户端正常关闭
    Closed,
    /// 传输层错误
    Failed(String),
}

#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// 会话结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportError(String),
    /// 写回客户端失败
    OutboundFailed(String),
    /// 投递失败被移出注册表，出站队列已关闭
    Evicted,
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub connection_id: ConnectionId,
    pub reason: CloseReason,
    /// 收到的载荷数量（含被丢弃的）
    pub received: u64,
}

#[async_trait]
pub trait InboundChannel: Send {
    /// 等待下一帧；需要可以安全地被取消
    async fn receive(&mut self) -> ReceiveOutcome;
}

#[async_trait]
pub trait OutboundChannel: Send + 'static {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError>;

    /// 出站队列关闭后调用
    async fn close(&mut self) {}
}

pub struct Session {
    id: ConnectionId,
    state: SessionState,
    registry: ConnectionRegistry,
    coordinator: Arc<BroadcastCoordinator>,
    outbound_buffer: usize,
}

impl Session {
    pub fn new(
        registry: ConnectionRegistry,
        coordinator: Arc<BroadcastCoordinator>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            state: SessionState::Connecting,
            registry,
            coordinator,
            outbound_buffer,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 运行会话直到连接终止
    pub async fn run<I, O>(mut self, mut inbound: I, outbound: O) -> SessionSummary
    where
        I: InboundChannel,
        O: OutboundChannel,
    {
        let (handle, queue) = ConnectionHandle::channel(self.id, self.outbound_buffer);
        let eviction = handle.eviction_signal();
        if let Err(err) = self.registry.add(handle).await {
            error!(connection_id = %self.id, error = %err, "连接注册失败");
            self.transition(SessionState::Closed);
            return self.summary(CloseReason::Internal(err.to_string()), 0);
        }
        self.transition(SessionState::Active);
        info!(connection_id = %self.id, "会话开始");

        let mut writer = tokio::spawn(write_outbound(queue, outbound));
        let mut received = 0u64;

        let reason = loop {
            tokio::select! {
                // 驱逐优先，被移除后不再处理该连接的任何入站帧
                biased;

                _ = eviction.notified() => break CloseReason::Evicted,
                outcome = inbound.receive() => match outcome {
                    ReceiveOutcome::Payload(text) => {
                        received += 1;
                        if let Some(reason) = self.dispatch(&text).await {
                            break reason;
                        }
                    }
                    ReceiveOutcome::Ignored => {}
                    ReceiveOutcome::Malformed(detail) => {
                        received += 1;
                        debug!(connection_id = %self.id, detail = %detail, "丢弃无法解码的帧");
                    }
                    ReceiveOutcome::Closed => break CloseReason::ClientClosed,
                    ReceiveOutcome::Failed(err) => break CloseReason::TransportError(err),
                },
                result = &mut writer => {
                    break match result {
                        Ok(Ok(())) => CloseReason::Evicted,
                        Ok(Err(err)) => CloseReason::OutboundFailed(err.to_string()),
                        Err(err) => CloseReason::Internal(err.to_string()),
                    };
                }
            }
        };

        self.transition(SessionState::Closing);
        self.registry.remove(self.id).await;
        writer.abort();
        self.transition(SessionState::Closed);

        info!(connection_id = %self.id, ?reason, received, "会话结束");
        self.summary(reason, received)
    }

    /// 处理一条载荷；返回 `Some` 表示会话需要结束
    async fn dispatch(&self, text: &str) -> Option<CloseReason> {
        match self.coordinator.handle_inbound(text, self.id).await {
            Ok(InboundOutcome::Broadcast(report)) => {
                debug!(
                    connection_id = %self.id,
                    message_id = %report.message.id,
                    delivered = report.delivered,
                    "消息已广播"
                );
                None
            }
            Ok(InboundOutcome::Ignored(reason)) => {
                debug!(connection_id = %self.id, ?reason, "消息被忽略");
                None
            }
            Err(err) if err.is_recoverable() => {
                warn!(connection_id = %self.id, error = %err, "消息被丢弃");
                None
            }
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "内部错误，关闭会话");
                Some(CloseReason::Internal(err.to_string()))
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection_id = %self.id, from = ?self.state, to = ?next, "会话状态变更");
        self.state = next;
    }

    fn summary(&self, reason: CloseReason, received: u64) -> SessionSummary {
        SessionSummary {
            connection_id: self.id,
            reason,
            received,
        }
    }
}

/// 把出站队列写回客户端；队列关闭（会话被注销）时正常返回
async fn write_outbound<O: OutboundChannel>(
    mut queue: mpsc::Receiver<OutboundFrame>,
    mut outbound: O,
) -> Result<(), TransportError> {
    while let Some(frame) = queue.recv().await {
        outbound.send(frame).await?;
    }
    outbound.close().await;
    Ok(())
}

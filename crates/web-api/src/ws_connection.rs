//! WebSocket 传输适配
//!
//! 把 axum 的 `WebSocket` 拆成读写两半，分别实现应用层会话需要的
//! [`InboundChannel`] 与 [`OutboundChannel`]。

use application::{
    InboundChannel, OutboundChannel, OutboundFrame, ReceiveOutcome, Session, TransportError,
};
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};

use crate::state::AppState;

pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl InboundChannel for WsInbound {
    async fn receive(&mut self) -> ReceiveOutcome {
        match self.stream.next().await {
            Some(Ok(WsMessage::Text(text))) => ReceiveOutcome::Payload(text.as_str().to_owned()),
            // 二进制帧按 UTF-8 文本处理
            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => ReceiveOutcome::Payload(text),
                Err(err) => ReceiveOutcome::Malformed(err.to_string()),
            },
            // axum 会自动回复 Ping
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => ReceiveOutcome::Ignored,
            Some(Ok(WsMessage::Close(_))) | None => ReceiveOutcome::Closed,
            Some(Err(err)) => ReceiveOutcome::Failed(err.to_string()),
        }
    }
}

pub struct WsOutbound {
    sink: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl OutboundChannel for WsOutbound {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.sink
            .send(WsMessage::Text(frame.to_string().into()))
            .await
            .map_err(|err| TransportError(err.to_string()))
    }

    async fn close(&mut self) {
        if let Err(err) = self.sink.close().await {
            tracing::debug!(error = %err, "WebSocket 关闭失败");
        }
    }
}

/// 在升级完成的连接上运行一个会话，直到连接结束
pub async fn serve(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let session = Session::new(
        state.registry.clone(),
        state.coordinator.clone(),
        state.outbound_buffer,
    );
    tracing::info!(connection_id = %session.id(), "WebSocket 连接已建立");

    let summary = session
        .run(WsInbound { stream }, WsOutbound { sink })
        .await;

    tracing::info!(
        connection_id = %summary.connection_id,
        reason = ?summary.reason,
        received = summary.received,
        "WebSocket 连接已断开"
    );
}

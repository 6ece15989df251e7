#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ConnectionRegistry, InMemoryMessageStore};
use config::CorsConfig;
use domain::MessageStore;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{cors_layer, router, AppState};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 在随机端口上运行的测试服务
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: ConnectionRegistry,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_store(Arc::new(InMemoryMessageStore::new())).await
    }

    pub async fn with_store(store: Arc<dyn MessageStore>) -> Self {
        let registry = ConnectionRegistry::new();
        let state = AppState::new(store, registry.clone(), 64);
        let app = router(state, cors_layer(&CorsConfig::default()).expect("cors"));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 建立 WebSocket 连接并等待服务端完成注册
    pub async fn connect(&self) -> WsClient {
        let expected = self.registry.len().await + 1;
        let (client, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("connect websocket");
        self.wait_for_connections(expected).await;
        client
    }

    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..200 {
            if self.registry.len().await == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {expected} registered connections, found {}",
            self.registry.len().await
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn send_json(client: &mut WsClient, payload: Value) {
    client
        .send(TungsteniteMessage::Text(payload.to_string().into()))
        .await
        .expect("send frame");
}

pub async fn send_raw(client: &mut WsClient, text: &str) {
    client
        .send(TungsteniteMessage::Text(text.to_owned().into()))
        .await
        .expect("send frame");
}

/// 读取下一条文本帧并解析为 JSON
pub async fn next_json(client: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(&text).expect("broadcast json");
        }
    }
}

/// 断言在给定时间内没有收到任何文本帧
pub async fn assert_silent(client: &mut WsClient, wait: Duration) {
    if let Ok(Some(Ok(TungsteniteMessage::Text(text)))) = timeout(wait, client.next()).await {
        panic!("unexpected frame: {text}");
    }
}

//! 广播协调器
//!
//! 每条入站消息都经过这里：解析、持久化、再扇出到注册表快照中的所有连接。
//! 持久化与扇出在同一把锁内完成，因此客户端看到的顺序与存储顺序一致。

use std::sync::Arc;

use domain::{ConnectionId, InboundPayload, Message, MessageStore};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::registry::{ConnectionRegistry, OutboundFrame};

/// 入站消息被丢弃的原因（均不视为错误）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// 正文为空或只有空白
    EmptyContent,
    /// 载荷不是合法的消息 JSON
    Malformed(String),
}

/// 一次扇出的结果
#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub message: Message,
    /// 成功放入出站队列的连接数
    pub delivered: usize,
    /// 投递失败并被移出注册表的连接
    pub evicted: Vec<ConnectionId>,
}

#[derive(Debug, Clone)]
pub enum InboundOutcome {
    Broadcast(BroadcastReport),
    Ignored(IgnoreReason),
}

pub struct BroadcastCoordinator {
    store: Arc<dyn MessageStore>,
    registry: ConnectionRegistry,
    sequencer: Mutex<()>,
}

impl BroadcastCoordinator {
    pub fn new(store: Arc<dyn MessageStore>, registry: ConnectionRegistry) -> Self {
        Self {
            store,
            registry,
            sequencer: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 处理一条来自 `source` 的原始载荷
    ///
    /// 持久化失败时返回 `ApplicationError::Repository`，此时不会广播。
    /// 单个连接的投递失败只会把该连接移出注册表，不影响整体结果。
    pub async fn handle_inbound(
        &self,
        raw_payload: &str,
        source: ConnectionId,
    ) -> Result<InboundOutcome, ApplicationError> {
        let payload = match InboundPayload::parse(raw_payload) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(connection_id = %source, error = %err, "丢弃格式错误的消息");
                return Ok(InboundOutcome::Ignored(IgnoreReason::Malformed(
                    err.to_string(),
                )));
            }
        };

        let Some(draft) = payload.into_new_message() else {
            debug!(connection_id = %source, "丢弃空内容消息");
            return Ok(InboundOutcome::Ignored(IgnoreReason::EmptyContent));
        };

        let _sequence = self.sequencer.lock().await;

        let message = self
            .store
            .append(draft.username(), draft.content())
            .await
            .inspect_err(|err| {
                warn!(connection_id = %source, error = %err, "消息持久化失败");
            })?;

        debug!(connection_id = %source, message_id = %message.id, "消息已持久化");

        let frame: OutboundFrame = Arc::from(serde_json::to_string(&message)?);
        Ok(InboundOutcome::Broadcast(self.fan_out(message, frame).await))
    }

    async fn fan_out(&self, message: Message, frame: OutboundFrame) -> BroadcastReport {
        let snapshot = self.registry.snapshot().await;
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for handle in &snapshot {
            match handle.deliver(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(connection_id = %handle.id(), error = %err, "投递失败，移除连接");
                    handle.evict();
                    evicted.push(handle.id());
                }
            }
        }
        // 先释放快照里的发送端，移除后会话的出站队列才会真正关闭
        drop(snapshot);

        for id in &evicted {
            self.registry.remove(*id).await;
        }

        if !evicted.is_empty() {
            info!(
                message_id = %message.id,
                delivered,
                evicted = evicted.len(),
                "已移除投递失败的连接"
            );
        }

        BroadcastReport {
            message,
            delivered,
            evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryMessageStore;
    use crate::registry::ConnectionHandle;
    use domain::{MockMessageStore, RepositoryError, ANONYMOUS_USERNAME};
    use tokio::sync::mpsc;

    fn coordinator() -> (BroadcastCoordinator, Arc<InMemoryMessageStore>, ConnectionRegistry) {
        let store = Arc::new(InMemoryMessageStore::new());
        let registry = ConnectionRegistry::new();
        let coordinator = BroadcastCoordinator::new(store.clone(), registry.clone());
        (coordinator, store, registry)
    }

    async fn connect(
        registry: &ConnectionRegistry,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<OutboundFrame>) {
        let (handle, rx) = ConnectionHandle::channel(ConnectionId::generate(), capacity);
        let id = handle.id();
        registry.add(handle).await.unwrap();
        (id, rx)
    }

    fn decode(frame: &OutboundFrame) -> serde_json::Value {
        serde_json::from_str(frame).unwrap()
    }

    fn expect_broadcast(outcome: InboundOutcome) -> BroadcastReport {
        match outcome {
            InboundOutcome::Broadcast(report) => report,
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_connection_receives_one_copy() {
        let (coordinator, store, registry) = coordinator();
        let (sender, mut rx_sender) = connect(&registry, 8).await;
        let (_, mut rx_b) = connect(&registry, 8).await;
        let (_, mut rx_c) = connect(&registry, 8).await;

        let outcome = coordinator
            .handle_inbound(r#"{"username":"alice","content":"hi"}"#, sender)
            .await
            .unwrap();
        let report = expect_broadcast(outcome);

        assert_eq!(report.delivered, 3);
        assert!(report.evicted.is_empty());
        assert_eq!(report.message.id.value(), 1);

        for rx in [&mut rx_sender, &mut rx_b, &mut rx_c] {
            let frame = rx.try_recv().unwrap();
            let json = decode(&frame);
            assert_eq!(json["id"], 1);
            assert_eq!(json["username"], "alice");
            assert_eq!(json["content"], "hi");
            assert!(json["created_at"].is_string());
            // 只有一份
            assert!(rx.try_recv().is_err());
        }

        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_content_is_neither_persisted_nor_broadcast() {
        let (coordinator, store, registry) = coordinator();
        let (sender, mut rx) = connect(&registry, 8).await;

        for raw in [r#"{"content":""}"#, r#"{"username":"bob","content":"   "}"#, "{}"] {
            let outcome = coordinator.handle_inbound(raw, sender).await.unwrap();
            assert!(matches!(
                outcome,
                InboundOutcome::Ignored(IgnoreReason::EmptyContent)
            ));
        }

        assert!(rx.try_recv().is_err());
        assert!(store.list_all().await.unwrap().is_empty());

        // ID 计数器没有被消耗
        let report = expect_broadcast(
            coordinator
                .handle_inbound(r#"{"content":"first"}"#, sender)
                .await
                .unwrap(),
        );
        assert_eq!(report.message.id.value(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_ignored() {
        let (coordinator, store, registry) = coordinator();
        let (sender, mut rx) = connect(&registry, 8).await;

        let outcome = coordinator.handle_inbound("{not json", sender).await.unwrap();
        assert!(matches!(
            outcome,
            InboundOutcome::Ignored(IgnoreReason::Malformed(_))
        ));
        assert!(rx.try_recv().is_err());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_username_is_broadcast_as_anonymous() {
        let (coordinator, store, registry) = coordinator();
        let (sender, mut rx) = connect(&registry, 8).await;

        coordinator
            .handle_inbound(r#"{"content":"who am i"}"#, sender)
            .await
            .unwrap();

        let json = decode(&rx.try_recv().unwrap());
        assert_eq!(json["username"], ANONYMOUS_USERNAME);
        assert_eq!(store.list_all().await.unwrap()[0].username, ANONYMOUS_USERNAME);
    }

    #[tokio::test]
    async fn test_broken_connection_is_evicted_and_others_still_receive() {
        let (coordinator, _store, registry) = coordinator();
        let (sender, mut rx_sender) = connect(&registry, 8).await;
        let (broken, rx_broken) = connect(&registry, 8).await;
        let (_, mut rx_peer) = connect(&registry, 8).await;
        drop(rx_broken);

        let report = expect_broadcast(
            coordinator
                .handle_inbound(r#"{"content":"still here"}"#, sender)
                .await
                .unwrap(),
        );

        assert_eq!(report.delivered, 2);
        assert_eq!(report.evicted, vec![broken]);
        assert!(!registry.contains(broken).await);
        assert_eq!(registry.len().await, 2);
        assert!(rx_sender.try_recv().is_ok());
        assert!(rx_peer.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_saturated_connection_is_evicted() {
        let (coordinator, _store, registry) = coordinator();
        let (sender, mut rx_sender) = connect(&registry, 8).await;
        let (slow, mut rx_slow) = connect(&registry, 1).await;

        coordinator
            .handle_inbound(r#"{"content":"one"}"#, sender)
            .await
            .unwrap();
        let report = expect_broadcast(
            coordinator
                .handle_inbound(r#"{"content":"two"}"#, sender)
                .await
                .unwrap(),
        );

        assert_eq!(report.evicted, vec![slow]);
        assert!(!registry.contains(slow).await);
        assert_eq!(rx_sender.try_recv().map(|f| decode(&f)["content"].clone()).unwrap(), "one");
        assert_eq!(rx_sender.try_recv().map(|f| decode(&f)["content"].clone()).unwrap(), "two");

        // 慢连接只拿到第一条，之后队列关闭
        assert_eq!(decode(&rx_slow.recv().await.unwrap())["content"], "one");
        assert!(rx_slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_late_and_departed_connections() {
        let (coordinator, _store, registry) = coordinator();
        let (sender, mut rx_sender) = connect(&registry, 8).await;
        let (departed, mut rx_departed) = connect(&registry, 8).await;
        registry.remove(departed).await;

        coordinator
            .handle_inbound(r#"{"content":"before"}"#, sender)
            .await
            .unwrap();
        let (_, mut rx_late) = connect(&registry, 8).await;

        assert!(rx_sender.try_recv().is_ok());
        // 已注销的连接收不到，队列也已关闭
        assert!(rx_departed.recv().await.is_none());
        // 快照之后加入的连接收不到这条广播
        assert!(rx_late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_, _| Err(RepositoryError::storage("database unavailable")));

        let registry = ConnectionRegistry::new();
        let coordinator = BroadcastCoordinator::new(Arc::new(store), registry.clone());
        let (sender, mut rx) = connect(&registry, 8).await;

        let err = coordinator
            .handle_inbound(r#"{"content":"lost"}"#, sender)
            .await
            .unwrap_err();

        assert!(matches!(err, ApplicationError::Repository(_)));
        assert!(err.is_recoverable());
        assert!(rx.try_recv().is_err());
        assert!(registry.contains(sender).await);
    }

    #[tokio::test]
    async fn test_store_receives_normalized_fields() {
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .withf(|username, content| {
                username.to_string() == "carol" && content.to_string() == " spaced "
            })
            .times(1)
            .returning(|username, content| {
                Ok(Message::new(
                    domain::MessageId::new(42),
                    username,
                    content,
                    chrono::Utc::now(),
                ))
            });

        let registry = ConnectionRegistry::new();
        let coordinator = BroadcastCoordinator::new(Arc::new(store), registry.clone());
        let (sender, _rx) = connect(&registry, 8).await;

        let report = expect_broadcast(
            coordinator
                .handle_inbound(r#"{"username":"  carol ","content":" spaced "}"#, sender)
                .await
                .unwrap(),
        );
        assert_eq!(report.message.id.value(), 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_observe_storage_order() {
        let (coordinator, store, registry) = coordinator();
        let coordinator = Arc::new(coordinator);
        let (observer, mut rx_observer) = connect(&registry, 256).await;

        let tasks: Vec<_> = (0..8)
            .map(|sender_index| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let source = ConnectionId::generate();
                    for n in 0..10 {
                        let raw = format!(r#"{{"username":"u{sender_index}","content":"m{n}"}}"#);
                        coordinator.handle_inbound(&raw, source).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.list_all().await.unwrap();
        assert_eq!(stored.len(), 80);
        let ids: Vec<i64> = stored.iter().map(|m| m.id.value()).collect();
        assert_eq!(ids, (1..=80).collect::<Vec<_>>());

        let mut observed = Vec::new();
        while let Ok(frame) = rx_observer.try_recv() {
            observed.push(decode(&frame)["id"].as_i64().unwrap());
        }
        assert_eq!(observed, ids);

        // 每个发送者自己的消息保持发送顺序
        for sender_index in 0..8 {
            let username = format!("u{sender_index}");
            let contents: Vec<_> = stored
                .iter()
                .filter(|m| m.username == username)
                .map(|m| m.content.clone())
                .collect();
            let expected: Vec<_> = (0..10).map(|n| format!("m{n}")).collect();
            assert_eq!(contents, expected);
        }
        assert!(registry.contains(observer).await);
    }
}

use std::sync::Arc;

use application::{BroadcastCoordinator, ConnectionRegistry};
use domain::MessageStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub registry: ConnectionRegistry,
    pub coordinator: Arc<BroadcastCoordinator>,
    /// 每个连接的出站队列容量
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MessageStore>,
        registry: ConnectionRegistry,
        outbound_buffer: usize,
    ) -> Self {
        let coordinator = Arc::new(BroadcastCoordinator::new(store.clone(), registry.clone()));
        Self {
            store,
            registry,
            coordinator,
            outbound_buffer,
        }
    }
}

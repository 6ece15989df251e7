//! Web API 层。
//!
//! 提供 Axum 路由，将 WebSocket 连接交给应用层会话，并暴露历史消息查询。

mod error;
mod routes;
mod state;
mod ws_connection;

pub use error::{ApiError, ErrorBody};
pub use routes::{cors_layer, router};
pub use state::AppState;

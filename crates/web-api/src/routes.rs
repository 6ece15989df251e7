use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use config::CorsConfig;
use domain::Message;
use serde::Serialize;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Serialize)]
struct StatusBody {
    status: &'static str,
    message: &'static str,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/messages", get(list_messages))
}

/// 根据配置构建跨域策略
///
/// `*` 允许任意来源但不携带凭据；具体地址只放行该来源并允许凭据。
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    if config.allows_any_origin() {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any));
    }

    let origin = HeaderValue::from_str(config.frontend_url.trim())?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn status() -> Json<StatusBody> {
    Json(StatusBody {
        status: "ok",
        message: "Chat relay is running",
    })
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state.store.list_all().await.map_err(|err| {
        tracing::warn!(error = %err, "加载历史消息失败");
        ApiError::from(err)
    })?;
    Ok(Json(messages))
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws_connection::serve(socket, state))
}

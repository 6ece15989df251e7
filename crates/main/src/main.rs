//! 主应用程序入口
//!
//! 加载配置、准备数据库并启动聊天中继服务。

use std::sync::Arc;

use anyhow::Context;
use application::ConnectionRegistry;
use config::AppConfig;
use domain::MessageStore;
use infrastructure::{create_pg_pool, PgMessageStore, MIGRATOR};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use web_api::{cors_layer, router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("配置无效")?;
    tracing::info!(
        database_url = %config.database.masked_url(),
        port = config.server.port,
        "配置加载完成"
    );

    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections)
        .await
        .context("连接数据库失败")?;
    MIGRATOR
        .run(&pg_pool)
        .await
        .context("数据库迁移失败")?;

    let registry = ConnectionRegistry::new();
    let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pg_pool));
    let state = AppState::new(store, registry.clone(), config.broadcast.outbound_buffer);

    let cors = cors_layer(&config.cors).context("FRONTEND_URL 无效")?;
    let app = router(state, cors);

    let address = config.server.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("监听 {address} 失败"))?;

    tracing::info!("聊天中继服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(connections = registry.len().await, "服务已停止");
    Ok(())
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "监听 Ctrl-C 失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "监听 SIGTERM 失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("收到停止信号，开始优雅关闭");
}

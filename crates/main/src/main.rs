//! 主应用程序入口
//!
//! 加载配置、连接数据库并启动实时聊天服务。

use std::sync::Arc;

use application::{
    ConnectionSessionManager, SessionDependencies, SessionSettings, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, JwtCredentialVerifier, PgStore};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    config.validate()?;

    tracing::info!(
        database = config.database.url.split('@').next_back().unwrap_or("unknown"),
        "连接数据库"
    );
    let pg_pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;

    // 运行迁移
    sqlx::migrate!("../../migrations").run(&pg_pool).await?;

    let store = Arc::new(PgStore::new(pg_pool));
    let verifier = Arc::new(JwtCredentialVerifier::new(&config.jwt, store.clone()));

    let sessions = Arc::new(ConnectionSessionManager::new(
        SessionDependencies {
            verifier,
            users: store.clone(),
            rooms: store.clone(),
            members: store.clone(),
            messages: store,
            clock: Arc::new(SystemClock),
        },
        SessionSettings::from(&config.realtime),
    ));
    sessions.start();

    let app = router(AppState::new(sessions.clone(), config.realtime.clone()));
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(address = %address, "聊天室服务器启动");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sessions.shutdown();
    tracing::info!("聊天室服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
    }
}

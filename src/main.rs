//! Authpilot - 网页登录自动化服务
//!
//! 入口：初始化日志、加载配置、构建运行时组件并启动 HTTP 服务；
//! 收到 Ctrl+C / SIGTERM 后停止接收请求，在宽限期内等待进行中的会话结束，
//! 超时的会话被取消并以 service_shutdown 写入终态、投递回调。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use authpilot::{
    agent::components_from_config,
    config::load_config,
    core::ShutdownManager,
    integrations::{router, HttpState},
    observability,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let api_key = config
        .server
        .resolved_api_key()
        .context("API key not configured (server.api_key or API_KEY)")?;

    std::fs::create_dir_all(&config.browser.profile_root).with_context(|| {
        format!(
            "Failed to create profile root {}",
            config.browser.profile_root.display()
        )
    })?;

    let agent = Arc::new(components_from_config(&config).context("Failed to build agent")?);
    let app = router(Arc::new(HttpState {
        agent: Arc::clone(&agent),
        api_key,
    }));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let listener = tokio::net::TcpListener::bind(config.server.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!("{} listening on {}", config.app.name, config.server.bind);

    let token = shutdown.token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("HTTP server failed")?;

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let finalize = Duration::from_secs(config.server.shutdown_finalize_secs);
    let forced = agent.shutdown_sessions(grace, finalize).await;
    if forced > 0 {
        tracing::warn!("Finalized {} requests without a completed session", forced);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

//! 优雅关闭处理
//!
//! 监听 Ctrl+C / SIGTERM 并取消 token，HTTP 服务随之停止接收请求；
//! drain_sessions 在给定时间内等待会话任务结束。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown();
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown();
                }
            });
        }
    }
}

/// 关闭会话跟踪器并在 wait 内等待所有会话结束；返回是否全部按时结束
pub async fn drain_sessions(tracker: &TaskTracker, wait: Duration) -> bool {
    tracker.close();
    let remaining = tracker.len();
    if remaining > 0 {
        tracing::info!("Waiting up to {}ms for {} in-flight sessions", wait.as_millis(), remaining);
    }
    match tokio::time::timeout(wait, tracker.wait()).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(
                "Wait of {}ms elapsed with {} sessions still running",
                wait.as_millis(),
                tracker.len()
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_cancels_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_drain_waits_for_sessions() {
        let tracker = TaskTracker::new();
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        assert!(drain_sessions(&tracker, Duration::from_secs(2)).await);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_wait() {
        let tracker = TaskTracker::new();
        tracker.spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(!drain_sessions(&tracker, Duration::from_millis(20)).await);
    }
}

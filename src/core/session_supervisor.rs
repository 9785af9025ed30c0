//! 会话监管：截止时间与取消
//!
//! 每个会话持有一个 SessionSupervisor：到达 deadline 时触发 CancellationToken，
//! 决策循环在 select! 中监听该 token，取消进行中的决策/工具调用。

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 会话级截止时间管理：唯一的取消来源是超时
#[derive(Debug)]
pub struct SessionSupervisor {
    deadline: Instant,
    cancel_token: CancellationToken,
    timer: JoinHandle<()>,
}

impl SessionSupervisor {
    /// 启动 deadline 计时
    pub fn start(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            token.cancel();
        });
        Self {
            deadline,
            cancel_token,
            timer,
        }
    }

    /// deadline 是否已过（计时任务尚未调度时也以时钟为准）
    pub fn is_expired(&self) -> bool {
        self.cancel_token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// 等待 deadline 到达
    pub async fn expired(&self) {
        self.cancel_token.cancelled().await;
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervisor_fires_at_deadline() {
        let supervisor = SessionSupervisor::start(Duration::from_millis(30));
        assert!(!supervisor.is_expired());
        tokio::time::timeout(Duration::from_secs(2), supervisor.expired())
            .await
            .expect("deadline should fire");
        assert!(supervisor.is_expired());
    }

    #[tokio::test]
    async fn test_supervisor_not_expired_early() {
        let supervisor = SessionSupervisor::start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!supervisor.is_expired());
    }
}

//! 决策引擎重试包装：瞬时错误（网络 / 429 / 5xx）按指数退避重试

use std::time::Duration;

use async_trait::async_trait;

use crate::config::LlmRetrySection;
use crate::llm::{Decision, DecisionEngine, LlmError};
use crate::memory::Conversation;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 首次失败后的最大重试次数
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&LlmRetrySection::default())
    }
}

impl From<&LlmRetrySection> for RetryConfig {
    fn from(section: &LlmRetrySection) -> Self {
        Self {
            max_retries: section.max_retries,
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试（从 0 开始）前的等待；429 时至少等待服务端给出的时长
    pub fn backoff(&self, attempt: u32, error: &LlmError) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let delay = match error {
            LlmError::RateLimited { retry_after_ms } => exp.max(Duration::from_millis(*retry_after_ms)),
            _ => exp,
        };
        delay.min(self.max_delay)
    }
}

pub struct RetryingEngine<E> {
    inner: E,
    config: RetryConfig,
}

impl<E: DecisionEngine> RetryingEngine<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<E: DecisionEngine> DecisionEngine for RetryingEngine<E> {
    async fn decide(&self, conversation: &Conversation) -> Result<Decision, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.decide(conversation).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt, &e);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Decision engine call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//! 决策引擎抽象
//!
//! 给定完整对话，返回最终答复或有序的工具调用请求。所有后端（Anthropic / 脚本化 Mock）
//! 实现 DecisionEngine；瞬时失败的重试由 RetryingEngine 包装，不进入编排循环。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Conversation;
use crate::tools::ToolInvocation;

/// 决策结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// 候选产物文本
    Final(String),
    /// 非空、按执行顺序排列的工具调用
    ToolCalls(Vec<ToolInvocation>),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// 响应无法解析，或工具调用列表为空
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// 网络错误、429 与 5xx 可重试
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, conversation: &Conversation) -> Result<Decision, LlmError>;
}

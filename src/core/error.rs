//! 错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：可恢复错误（工具级失败、校验失败）转为反馈写回对话，
//! 其余错误终止会话，并只对外暴露稳定的 FailureReason 字符串。

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 子进程不可达、崩溃或握手异常（致命）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 子进程存活但工具执行失败（可恢复，写回对话）
    #[error("Tool invocation failed: {tool}: {message}")]
    ToolInvocation { tool: String, message: String },

    /// 产物未通过语法/内容校验（可恢复，直到 max_corrections）
    #[error("Validation failed: {0}")]
    Validation(String),

    /// 决策引擎不可用或返回格式错误（致命）
    #[error("Decision engine error: {0}")]
    DecisionEngine(#[from] LlmError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),
}

/// 终止原因：对外（Webhook / 状态查询）唯一暴露的失败信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProtocolFailure,
    IterationBudgetExceeded,
    ValidationExhausted,
    Timeout,
    DecisionEngineFailure,
    /// 决策引擎按约定输出了 TASK_FAILED
    AgentReportedFailure,
    /// 服务关闭时会话在宽限期内未结束
    ServiceShutdown,
    InternalError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ProtocolFailure => "protocol_failure",
            FailureReason::IterationBudgetExceeded => "iteration_budget_exceeded",
            FailureReason::ValidationExhausted => "validation_exhausted",
            FailureReason::Timeout => "timeout",
            FailureReason::DecisionEngineFailure => "decision_engine_failure",
            FailureReason::AgentReportedFailure => "agent_reported_failure",
            FailureReason::ServiceShutdown => "service_shutdown",
            FailureReason::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将反馈写入下一轮对话，让决策引擎重试
    RetryWithPrompt(String),
    /// 终止会话
    Abort(FailureReason),
}

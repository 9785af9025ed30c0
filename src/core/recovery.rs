//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供决策循环决定是写回反馈重试还是终止。

use crate::core::{AgentError, FailureReason, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（反馈重试 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::ToolInvocation { tool, message } => {
                RecoveryAction::RetryWithPrompt(format!("Error from {tool}: {message}"))
            }
            AgentError::Validation(reason) => RecoveryAction::RetryWithPrompt(format!(
                "ERROR: {reason}\n\nPlease fix your response and try again. \
                 Reply with only the final result, no explanations."
            )),
            AgentError::Protocol(_) => RecoveryAction::Abort(FailureReason::ProtocolFailure),
            AgentError::DecisionEngine(_) => {
                RecoveryAction::Abort(FailureReason::DecisionEngineFailure)
            }
            AgentError::InvalidRequest(_) | AgentError::Config(_) => {
                RecoveryAction::Abort(FailureReason::InternalError)
            }
        }
    }
}

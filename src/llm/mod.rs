//! LLM 层：决策引擎抽象与实现（Anthropic / 脚本化 Mock）及重试包装

pub mod anthropic;
pub mod mock;
pub mod retry;
pub mod traits;

use std::sync::Arc;

pub use anthropic::{AnthropicConfig, AnthropicEngine};
pub use mock::{ScriptedDecisionEngine, ScriptedStep};
pub use retry::{RetryConfig, RetryingEngine};
pub use traits::{Decision, DecisionEngine, LlmError};

use crate::config::LlmSection;
use crate::core::AgentError;

/// 按配置创建决策引擎（带重试）；provider 为 "mock" 时返回空脚本引擎
pub fn create_decision_engine(section: &LlmSection) -> Result<Arc<dyn DecisionEngine>, AgentError> {
    let retry = RetryConfig::from(&section.retry);
    match section.provider.as_str() {
        "anthropic" => {
            let engine = AnthropicEngine::new(AnthropicConfig::from_section(section)?)?;
            tracing::info!(model = %section.model, "Using Anthropic decision engine");
            Ok(Arc::new(RetryingEngine::new(engine, retry)))
        }
        "mock" => {
            tracing::warn!("Using scripted mock decision engine");
            Ok(Arc::new(ScriptedDecisionEngine::default()))
        }
        other => Err(AgentError::Config(format!("unknown llm provider: {}", other))),
    }
}

//! 脚本化决策引擎（用于测试，无需 API）
//!
//! 按顺序回放预设步骤；每次调用记录收到的对话快照，脚本耗尽后返回 Malformed。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{Decision, DecisionEngine, LlmError};
use crate::memory::Conversation;
use crate::tools::ToolInvocation;

#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Tools(Vec<ToolInvocation>),
    Final(String),
    Fail(LlmError),
    /// 先等待再执行内层步骤
    Slow(Duration, Box<ScriptedStep>),
}

impl ScriptedStep {
    /// 按 (工具名, 参数) 生成工具调用步骤，call id 为 "<tool>_<序号>"
    pub fn tools(calls: &[(&str, Value)]) -> Self {
        ScriptedStep::Tools(
            calls
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolInvocation::new(format!("{}_{}", name, i), *name, args.clone()))
                .collect(),
        )
    }

    pub fn tool(name: &str, args: Value) -> Self {
        Self::tools(&[(name, args)])
    }
}

#[derive(Clone, Default)]
pub struct ScriptedDecisionEngine {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    seen: Arc<Mutex<Vec<Conversation>>>,
}

impl ScriptedDecisionEngine {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// decide 被调用的次数
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 每次调用时收到的对话快照
    pub fn conversations(&self) -> Vec<Conversation> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> Option<ScriptedStep> {
        self.steps.lock().ok().and_then(|mut s| s.pop_front())
    }
}

async fn play(step: ScriptedStep) -> Result<Decision, LlmError> {
    let mut step = step;
    loop {
        match step {
            ScriptedStep::Tools(calls) => return Ok(Decision::ToolCalls(calls)),
            ScriptedStep::Final(text) => return Ok(Decision::Final(text)),
            ScriptedStep::Fail(e) => return Err(e),
            ScriptedStep::Slow(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
        }
    }
}

#[async_trait]
impl DecisionEngine for ScriptedDecisionEngine {
    async fn decide(&self, conversation: &Conversation) -> Result<Decision, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(conversation.clone());
        }
        match self.next_step() {
            Some(step) => play(step).await,
            None => Err(LlmError::Malformed("script exhausted".to_string())),
        }
    }
}

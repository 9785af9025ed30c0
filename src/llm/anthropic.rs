//! Anthropic Messages API 决策引擎
//!
//! 对话映射：system 轮合并为 `system` 字段；assistant 的工具调用为 `tool_use` 块；
//! 工具结果作为 user 消息中的 `tool_result` 块；相邻同角色消息合并。
//! `stop_reason == "tool_use"` 时返回工具调用，否则返回拼接后的文本。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmSection;
use crate::llm::{Decision, DecisionEngine, LlmError};
use crate::memory::{ContentBlock, Conversation, Role};
use crate::tools::ToolInvocation;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn from_section(section: &LlmSection) -> Result<Self, LlmError> {
        let api_key = section.resolved_api_key().ok_or_else(|| LlmError::Api {
            status: 401,
            message: "missing API key (llm.api_key or ANTHROPIC_API_KEY)".to_string(),
        })?;
        Ok(Self {
            api_key,
            model: section.model.clone(),
            api_base: section.base_url.clone(),
            max_tokens: section.max_tokens,
            timeout: Duration::from_secs(section.timeouts.request),
        })
    }
}

pub struct AnthropicEngine {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicEngine {
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DecisionEngine for AnthropicEngine {
    async fn decide(&self, conversation: &Conversation) -> Result<Decision, LlmError> {
        let body = build_request(&self.config, conversation);
        let url = format!("{}/messages", self.config.api_base.trim_end_matches('/'));

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(0);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        let response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(format!("invalid response body: {e}")))?;
        if let Some(usage) = &response.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "decision engine usage"
            );
        }
        parse_response(response)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn build_request(config: &AnthropicConfig, conversation: &Conversation) -> MessagesRequest {
    let mut messages: Vec<ApiMessage> = Vec::new();
    for turn in conversation.turns() {
        let role = match turn.role {
            Role::System => continue,
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        let content: Vec<Value> = turn.blocks.iter().map(block_to_json).collect();
        if content.is_empty() {
            continue;
        }
        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => messages.push(ApiMessage { role, content }),
        }
    }

    let tools = conversation
        .tools()
        .iter()
        .map(|t| ApiTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect();

    MessagesRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        system: conversation.system_text(),
        messages,
        tools,
    }
}

fn block_to_json(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({ "type": "text", "text": text }),
        ContentBlock::ToolCall(call) => serde_json::json!({
            "type": "tool_use",
            "id": call.call_id,
            "name": call.name,
            "input": call.arguments,
        }),
        ContentBlock::ToolResult(outcome) => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": outcome.call_id,
            "content": outcome.content,
            "is_error": outcome.is_error,
        }),
    }
}

fn parse_response(response: MessagesResponse) -> Result<Decision, LlmError> {
    let mut texts = Vec::new();
    let mut calls = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => texts.push(text),
            ResponseBlock::ToolUse { id, name, input } => {
                let arguments = if input.is_null() { serde_json::json!({}) } else { input };
                calls.push(ToolInvocation::new(id, name, arguments));
            }
            ResponseBlock::Other => {}
        }
    }

    if response.stop_reason.as_deref() == Some("tool_use") {
        if calls.is_empty() {
            return Err(LlmError::Malformed(
                "stop_reason tool_use without tool_use blocks".to_string(),
            ));
        }
        return Ok(Decision::ToolCalls(calls));
    }

    let text = texts.join("\n");
    if text.trim().is_empty() {
        return Err(LlmError::Malformed("response missing text content".to_string()));
    }
    Ok(Decision::Final(text))
}

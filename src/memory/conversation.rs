//! 会话对话日志
//!
//! 只追加、按顺序保存的轮次（system / user / assistant / tool），由单个会话独占；
//! 每轮由若干内容块组成：纯文本、工具调用（带 call id）或工具结果（引用 call id）。

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCatalogEntry, ToolInvocation, ToolOutcome};

/// 轮次角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 单个内容块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall(ToolInvocation),
    ToolResult(ToolOutcome),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl ConversationTurn {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// 拼接本轮的全部文本块
    pub fn text_content(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 只追加的对话日志，连同会话的工具目录（决策引擎需要它来声明可用工具）
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
    tools: Vec<ToolCatalogEntry>,
}

impl Conversation {
    pub fn new(tools: Vec<ToolCatalogEntry>) -> Self {
        Self {
            turns: Vec::new(),
            tools,
        }
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::text(Role::System, text));
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::text(Role::User, text));
    }

    /// 决策引擎的工具调用轮
    pub fn push_tool_calls(&mut self, calls: &[ToolInvocation]) {
        self.turns.push(ConversationTurn {
            role: Role::Assistant,
            blocks: calls.iter().cloned().map(ContentBlock::ToolCall).collect(),
        });
    }

    pub fn push_assistant_text(&mut self, text: impl Into<String>) {
        self.turns.push(ConversationTurn::text(Role::Assistant, text));
    }

    pub fn push_tool_result(&mut self, outcome: ToolOutcome) {
        self.turns.push(ConversationTurn {
            role: Role::Tool,
            blocks: vec![ContentBlock::ToolResult(outcome)],
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn tools(&self) -> &[ToolCatalogEntry] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// 所有 system 轮的文本（合并为一个系统提示）
    pub fn system_text(&self) -> String {
        self.turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(ConversationTurn::text_content)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }
}

//! 工具目录
//!
//! 握手时从子进程发现的工具（name / description / inputSchema），会话期间不可变；
//! 构建目录时为每个 inputSchema 编译一次 JSON Schema 校验器，分发前拒绝未知工具名与不合 schema 的参数。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use jsonschema::{validator_for, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 单个工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalogEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolCatalogEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }
}

/// 会话的工具目录（保持握手顺序），每个工具持有预编译的参数校验器
#[derive(Clone, Default)]
pub struct ToolCatalog {
    entries: Vec<ToolCatalogEntry>,
    validators: Vec<Arc<Validator>>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("tools", &self.tool_names())
            .finish()
    }
}

impl ToolCatalog {
    /// 校验并构建：名称非空且不重复，inputSchema 必须能编译
    pub fn from_entries(entries: Vec<ToolCatalogEntry>) -> Result<Self, String> {
        let mut seen = HashSet::new();
        let mut validators = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.name.trim().is_empty() {
                return Err("tool with empty name in catalog".to_string());
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(format!("duplicate tool in catalog: {}", entry.name));
            }
            let validator = validator_for(&entry.input_schema)
                .map_err(|e| format!("invalid input schema for {}: {}", entry.name, e))?;
            validators.push(Arc::new(validator));
        }
        Ok(Self {
            entries,
            validators,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ToolCatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// 分发前检查：工具名必须在目录中，参数必须是对象且符合 inputSchema；
    /// 只返回第一条校验错误
    pub fn check_arguments(&self, name: &str, arguments: &Value) -> Result<(), String> {
        let Some(index) = self.entries.iter().position(|e| e.name == name) else {
            return Err(format!(
                "unknown tool {}. Available tools: {}",
                name,
                self.tool_names().join(", ")
            ));
        };
        if !arguments.is_object() {
            return Err(format!("arguments for {} must be a JSON object", name));
        }
        match self.validators[index].iter_errors(arguments).next() {
            Some(err) => Err(format!("invalid arguments for {}: {}", name, err)),
            None => Ok(()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[ToolCatalogEntry] {
        &self.entries
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 生成 system prompt 中的 Available tools 段落
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|e| match e.description.as_deref() {
                Some(d) if !d.is_empty() => format!("- {}: {}", e.name, d),
                _ => format!("- {}", e.name),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 决策引擎请求的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 工具调用结果；is_error 表示工具级失败（子进程仍存活）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

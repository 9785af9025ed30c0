//! 脚本化工具会话（用于测试，无需浏览器子进程）
//!
//! 每个工具维护一个回复队列，队列耗尽后回复 "ok"；记录调用顺序与是否已 shutdown。
//! Clone 共享同一份状态，测试可在会话移交给编排器后继续观察。

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::core::AgentError;
use crate::tools::{
    ToolCatalog, ToolCatalogEntry, ToolInvocation, ToolLauncher, ToolOutcome, ToolSession,
};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Ok(String),
    /// 工具级失败（子进程仍存活）
    ToolError(String),
    /// 子进程崩溃
    Crash,
    /// 延迟后成功
    Slow(Duration),
}

#[derive(Clone)]
pub struct ScriptedToolSession {
    catalog: ToolCatalog,
    replies: Arc<Mutex<HashMap<String, VecDeque<ScriptedReply>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    shut_down: Arc<AtomicBool>,
    profile_dir: Option<PathBuf>,
}

impl ScriptedToolSession {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            catalog,
            replies: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            shut_down: Arc::new(AtomicBool::new(false)),
            profile_dir: None,
        }
    }

    /// 常见浏览器工具：navigate / snapshot / click / type
    pub fn browser() -> Self {
        let entries = vec![
            ToolCatalogEntry::new(
                "browser_navigate",
                "Navigate to a URL",
                json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
            ),
            ToolCatalogEntry::new(
                "browser_snapshot",
                "Capture accessibility snapshot of the current page",
                json!({"type": "object", "properties": {}}),
            ),
            ToolCatalogEntry::new(
                "browser_click",
                "Click an element",
                json!({"type": "object", "properties": {"element": {"type": "string"}}, "required": ["element"]}),
            ),
            ToolCatalogEntry::new(
                "browser_type",
                "Type text into an element",
                json!({
                    "type": "object",
                    "properties": {"element": {"type": "string"}, "text": {"type": "string"}},
                    "required": ["element", "text"]
                }),
            ),
        ];
        match ToolCatalog::from_entries(entries) {
            Ok(catalog) => Self::new(catalog),
            Err(_) => Self::new(ToolCatalog::default()),
        }
    }

    pub fn with_reply(self, tool: &str, reply: ScriptedReply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(tool.to_string()).or_default().push_back(reply);
        }
        self
    }

    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(dir.into());
        self
    }

    /// 已转发到会话的工具名（按调用顺序）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn next_reply(&self, tool: &str) -> ScriptedReply {
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.get_mut(tool).and_then(VecDeque::pop_front))
            .unwrap_or_else(|| ScriptedReply::Ok("ok".to_string()))
    }
}

#[async_trait]
impl ToolSession for ScriptedToolSession {
    fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    fn profile_dir(&self) -> Option<&Path> {
        self.profile_dir.as_deref()
    }

    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError> {
        if self.is_shut_down() {
            return Err(AgentError::Protocol("session already shut down".to_string()));
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.name.clone());
        }
        match self.next_reply(&invocation.name) {
            ScriptedReply::Ok(content) => Ok(ToolOutcome::ok(&invocation.call_id, content)),
            ScriptedReply::ToolError(content) => Ok(ToolOutcome::error(&invocation.call_id, content)),
            ScriptedReply::Crash => Err(AgentError::Protocol(format!(
                "subprocess exited during {}",
                invocation.name
            ))),
            ScriptedReply::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ToolOutcome::ok(&invocation.call_id, "ok"))
            }
        }
    }

    async fn shutdown(&mut self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// 每次 launch 返回模板会话的克隆（共享状态）；也可模拟启动失败
pub struct ScriptedLauncher {
    template: ScriptedToolSession,
    fail_with: Option<String>,
    launches: AtomicUsize,
}

impl ScriptedLauncher {
    pub fn new(template: ScriptedToolSession) -> Self {
        Self {
            template,
            fail_with: None,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            template: ScriptedToolSession::browser(),
            fail_with: Some(message.into()),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolLauncher for ScriptedLauncher {
    async fn launch(&self, _session_id: &str) -> Result<Box<dyn ToolSession>, AgentError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.fail_with {
            Some(message) => Err(AgentError::Protocol(message.clone())),
            None => Ok(Box::new(self.template.clone())),
        }
    }
}

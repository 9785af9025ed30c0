//! 工具层：浏览器自动化子进程（MCP stdio）、工具目录、分发执行器与测试替身

pub mod catalog;
pub mod client;
pub mod executor;
pub mod mock;
pub mod protocol;

use std::path::Path;

use async_trait::async_trait;

use crate::core::AgentError;

pub use catalog::{ToolCatalog, ToolCatalogEntry, ToolInvocation, ToolOutcome};
pub use client::{LaunchSpec, McpClient, McpLauncher};
pub use executor::ToolExecutor;
pub use mock::{ScriptedLauncher, ScriptedReply, ScriptedToolSession};

/// 一个会话独占的工具子进程句柄
///
/// invoke 的 Err 只用于子进程不可达（协议级失败）；工具自身失败以
/// `ToolOutcome { is_error: true }` 返回。
#[async_trait]
pub trait ToolSession: Send + Sync {
    fn catalog(&self) -> &ToolCatalog;

    /// 会话 profile 目录（网络 trace 从这里读取）
    fn profile_dir(&self) -> Option<&Path> {
        None
    }

    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError>;

    /// 释放子进程；重复调用无副作用
    async fn shutdown(&mut self);
}

/// 为会话启动工具子进程
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    async fn launch(&self, session_id: &str) -> Result<Box<dyn ToolSession>, AgentError>;
}

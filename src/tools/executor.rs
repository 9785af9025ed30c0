//! 工具执行器
//!
//! 分发前按目录检查工具名与参数 schema（不通过则直接生成错误结果，不触达子进程），
//! 然后调用会话句柄；每次调用输出结构化审计日志（JSON），参数只记录键名。

use std::time::Instant;

use crate::core::AgentError;
use crate::tools::{ToolInvocation, ToolOutcome, ToolSession};

/// 绑定到单个会话的工具执行器
pub struct ToolExecutor<'a> {
    session: &'a dyn ToolSession,
    request_id: &'a str,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(session: &'a dyn ToolSession, request_id: &'a str) -> Self {
        Self { session, request_id }
    }

    /// 执行一次调用；Err 仅表示子进程协议级失败
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError> {
        let start = Instant::now();

        let result = match self.precheck(invocation) {
            Err(message) => Ok(ToolOutcome::error(&invocation.call_id, message)),
            Ok(()) => self.session.invoke(invocation).await,
        };

        let outcome = match &result {
            Ok(o) if !o.is_error => "ok",
            Ok(_) => "tool_error",
            Err(_) => "protocol_error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "request_id": self.request_id,
            "tool": invocation.name,
            "call_id": invocation.call_id,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "arg_keys": arg_keys(&invocation.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    fn precheck(&self, invocation: &ToolInvocation) -> Result<(), String> {
        self.session
            .catalog()
            .check_arguments(&invocation.name, &invocation.arguments)
            .map_err(|e| format!("Error: {}", e))
    }
}

/// 参数可能含有凭证（如 browser_type 的 text），审计日志只保留键名
fn arg_keys(args: &serde_json::Value) -> Vec<String> {
    args.as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ScriptedReply, ScriptedToolSession};
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_session() {
        let session = ScriptedToolSession::browser();
        let executor = ToolExecutor::new(&session, "req-1");
        let outcome = executor
            .execute(&ToolInvocation::new("c1", "browser_teleport", json!({})))
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert!(outcome.content.contains("unknown tool browser_teleport"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let session = ScriptedToolSession::browser();
        let executor = ToolExecutor::new(&session, "req-1");
        let outcome = executor
            .execute(&ToolInvocation::new("c1", "browser_navigate", json!({})))
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert!(outcome.content.contains("url"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_schema_type_mismatch_never_reaches_session() {
        let session = ScriptedToolSession::browser();
        let executor = ToolExecutor::new(&session, "req-1");
        let outcome = executor
            .execute(&ToolInvocation::new("c1", "browser_navigate", json!({"url": 42})))
            .await
            .unwrap();
        assert!(outcome.is_error);
        assert!(outcome.content.starts_with("Error: invalid arguments for browser_navigate"));
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_valid_call_is_forwarded() {
        let session = ScriptedToolSession::browser()
            .with_reply("browser_navigate", ScriptedReply::Ok("navigated".into()));
        let executor = ToolExecutor::new(&session, "req-1");
        let outcome = executor
            .execute(&ToolInvocation::new("c1", "browser_navigate", json!({"url": "https://x.com"})))
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::ok("c1", "navigated"));
        assert_eq!(session.calls(), vec!["browser_navigate".to_string()]);
    }

    #[test]
    fn test_arg_keys_hide_values() {
        let keys = arg_keys(&json!({"element": "Password", "text": "hunter2"}));
        assert_eq!(keys, vec!["element".to_string(), "text".to_string()]);
    }
}

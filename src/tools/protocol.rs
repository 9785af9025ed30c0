//! 子进程工具协议：JSON-RPC 2.0 over stdio（MCP 消息形状）
//!
//! 每行一条 JSON 消息；请求带自增 id，响应带相同 id。

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Serialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// 子进程发来的任意消息；只有带数字 id 且含 result/error 的才是响应
#[derive(Deserialize, Debug, Clone)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl IncomingMessage {
    /// 若为响应则返回关联 id
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        if self.result.is_none() && self.error.is_none() {
            return None;
        }
        self.id.as_ref().and_then(Value::as_u64)
    }
}

pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    serde_json::json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version
        }
    })
}

/// tools/call 结果：content 中的文本块拼接；非文本块以占位符表示
pub fn call_result_text(result: &Value) -> String {
    let Some(blocks) = result.get("content").and_then(Value::as_array) else {
        return result.to_string();
    };
    let parts: Vec<String> = blocks
        .iter()
        .map(|block| match block.get("type").and_then(Value::as_str) {
            Some("text") => block
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(other) => format!("[{} content omitted]", other),
            None => block.to_string(),
        })
        .collect();
    parts.join("\n")
}

pub fn call_result_is_error(result: &Value) -> bool {
    result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_empty_params() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let s = serde_json::to_string(&req).unwrap();
        assert_eq!(s, r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#);
    }

    #[test]
    fn test_incoming_response_vs_server_request() {
        let resp: IncomingMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert_eq!(resp.response_id(), Some(3));

        let notif: IncomingMessage = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}"#,
        )
        .unwrap();
        assert_eq!(notif.response_id(), None);

        let server_req: IncomingMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a","method":"roots/list"}"#).unwrap();
        assert_eq!(server_req.response_id(), None);
    }

    #[test]
    fn test_call_result_text_joins_text_blocks() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "Page title: Login"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "- button \"Next\""}
            ],
            "isError": false
        });
        assert_eq!(
            call_result_text(&result),
            "Page title: Login\n[image content omitted]\n- button \"Next\""
        );
        assert!(!call_result_is_error(&result));
    }

    #[test]
    fn test_call_result_is_error_flag() {
        let result = serde_json::json!({
            "content": [{"type": "text", "text": "Element not found"}],
            "isError": true
        });
        assert!(call_result_is_error(&result));
    }
}

//! 请求数据模型：登录请求、凭据包、终态结果
//!
//! 由 HTTP 接入层构造并校验后交给 agent::submit；凭据只在会话的任务提示词中使用，
//! Debug 输出与状态查询均不包含密码。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{AgentError, FailureReason};

/// 请求 ID（uuid v4）
pub type RequestId = String;

/// 凭据包：主邮箱 + 邮箱密码必填；用户名/密码要么都有，要么都没有
#[derive(Clone, Deserialize)]
pub struct CredentialBundle {
    pub email: String,
    /// 二次验证邮箱（用于读取验证码 / magic link）的密码
    pub mailbox_password: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl CredentialBundle {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(AgentError::InvalidRequest(
                "email must be a valid address".to_string(),
            ));
        }
        if self.mailbox_password.is_empty() {
            return Err(AgentError::InvalidRequest(
                "mailbox password is required".to_string(),
            ));
        }
        let has_username = self.username.as_deref().is_some_and(|u| !u.is_empty());
        let has_password = self.password.as_deref().is_some_and(|p| !p.is_empty());
        if has_username != has_password {
            return Err(AgentError::InvalidRequest(
                "username and password must be provided together".to_string(),
            ));
        }
        Ok(())
    }

    /// 是否走用户名/密码登录（否则为 magic link / 仅邮箱）
    pub fn has_password_login(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("email", &self.email)
            .field("mailbox_password", &"<redacted>")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// 已校验的登录请求
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub id: RequestId,
    pub target_url: String,
    pub credentials: CredentialBundle,
    pub callback_endpoint: String,
    /// 覆盖配置中的必需 key 列表
    pub required_keys: Option<Vec<String>>,
}

impl LoginRequest {
    pub fn new(
        target_url: impl Into<String>,
        credentials: CredentialBundle,
        callback_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_url: target_url.into(),
            credentials,
            callback_endpoint: callback_endpoint.into(),
            required_keys: None,
        }
    }

    pub fn with_required_keys(mut self, keys: Vec<String>) -> Self {
        self.required_keys = Some(keys);
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        check_http_url("target_url", &self.target_url)?;
        check_http_url("callback_endpoint", &self.callback_endpoint)?;
        self.credentials.validate()
    }
}

fn check_http_url(field: &str, raw: &str) -> Result<(), AgentError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| AgentError::InvalidRequest(format!("{field} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(AgentError::InvalidRequest(format!(
            "{field} must use http or https, got {other}"
        ))),
    }
}

/// 终态结果：会话结束时写入 Lifecycle Manager，也是 Webhook 负载的来源
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminalResult {
    pub success: bool,
    pub result: Option<String>,
    pub failure: Option<FailureReason>,
    pub iterations: u32,
}

impl TerminalResult {
    pub fn succeeded(artifact: String, iterations: u32) -> Self {
        Self {
            success: true,
            result: Some(artifact),
            failure: None,
            iterations,
        }
    }

    pub fn failed(reason: FailureReason, iterations: u32) -> Self {
        Self {
            success: false,
            result: None,
            failure: Some(reason),
            iterations,
        }
    }
}

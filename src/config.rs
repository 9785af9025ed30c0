//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AUTHPILOT__*` 覆盖（双下划线表示嵌套，
//! 如 `AUTHPILOT__AGENT__MAX_ITERATIONS=40`）。密钥缺省时回退到 `ANTHROPIC_API_KEY` / `API_KEY`。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub browser: BrowserSection,
    pub validator: ValidatorSection,
    pub artifact: ArtifactSection,
    pub webhook: WebhookSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "authpilot".to_string(),
        }
    }
}

/// [server] 段：监听地址、API Key、关闭宽限期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// 未配置时读取环境变量 API_KEY；两者都没有则拒绝启动
    pub api_key: Option<String>,
    /// 关闭时等待会话自然结束的时间
    pub shutdown_grace_secs: u64,
    /// 宽限期后取消剩余会话，再等待其写入终态并投递的时间
    pub shutdown_finalize_secs: u64,
    /// 终态请求记录在内存中保留的时长
    pub request_retention_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            api_key: None,
            shutdown_grace_secs: 30,
            shutdown_finalize_secs: 15,
            request_retention_secs: 86_400,
        }
    }
}

impl ServerSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

/// [llm] 段：决策引擎后端、模型与超时/重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key: None,
            max_tokens: 4096,
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

impl LlmSection {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次 HTTP 请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [llm.retry] 段：瞬时错误（网络 / 429 / 5xx）的指数退避
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmRetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 16_000,
        }
    }
}

/// [agent] 段：迭代 / 自我纠正 / 时间预算
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 工具轮次上限
    pub max_iterations: u32,
    /// 校验失败后的纠正反馈轮数上限
    pub max_corrections: u32,
    pub session_timeout_secs: u64,
    /// 将以 TASK_FAILED: 开头的回复视为 agent 主动报告失败
    pub honor_failure_marker: bool,
    /// 二次验证邮箱的登录地址（写入任务提示词）
    pub mailbox_login_url: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            max_corrections: 3,
            session_timeout_secs: 600,
            honor_failure_marker: true,
            mailbox_login_url: "https://account.proton.me/login".to_string(),
        }
    }
}

/// [browser] 段：自动化子进程启动参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub command: String,
    /// npx 包名；自定义 command 时可留空
    pub package: String,
    pub browser: String,
    pub headless: bool,
    /// 有头模式下的 DISPLAY（如 Xvfb 的 ":99"）
    pub display: Option<String>,
    pub user_agent: Option<String>,
    pub no_sandbox: bool,
    pub extra_args: Vec<String>,
    /// 每个会话在此目录下获得独立的 profile 子目录
    pub profile_root: PathBuf,
    pub keep_profiles: bool,
    pub startup_timeout_secs: u64,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            command: "npx".to_string(),
            package: "@playwright/mcp@latest".to_string(),
            browser: "chromium".to_string(),
            headless: false,
            display: None,
            user_agent: None,
            no_sandbox: true,
            extra_args: Vec::new(),
            profile_root: PathBuf::from("browser_profiles"),
            keep_profiles: false,
            startup_timeout_secs: 60,
            tool_timeout_secs: 90,
        }
    }
}

/// [validator] 段：产物语法
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorSection {
    pub delimiter: String,
    pub required_keys: Vec<String>,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            delimiter: "; ".to_string(),
            required_keys: Vec::new(),
        }
    }
}

/// 产物来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// 决策引擎的最终回复即产物
    #[default]
    Answer,
    /// 从会话 profile 下的网络 trace 中提取 Cookie
    NetworkTrace,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ArtifactSection {
    pub source: ArtifactSource,
}

/// [webhook] 段：回调投递的重试策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_secs: u64,
    /// 投递去重表保留的最近请求 id 数
    pub dedup_capacity: usize,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_secs: 30,
            dedup_capacity: 10_000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 AUTHPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AUTHPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AUTHPILOT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("validator.required_keys")
            .with_list_parse_key("browser.extra_args")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 30);
        assert_eq!(cfg.agent.max_corrections, 3);
        assert_eq!(cfg.validator.delimiter, "; ");
        assert_eq!(cfg.artifact.source, ArtifactSource::Answer);
        assert_eq!(cfg.webhook.max_attempts, 5);
        assert_eq!(cfg.browser.command, "npx");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_iterations = 12
session_timeout_secs = 90

[validator]
required_keys = ["auth_token", "ct0"]

[artifact]
source = "network_trace"
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.max_iterations, 12);
        assert_eq!(cfg.agent.session_timeout_secs, 90);
        // 未出现的键保持默认值
        assert_eq!(cfg.agent.max_corrections, 3);
        assert_eq!(cfg.validator.required_keys, vec!["auth_token", "ct0"]);
        assert_eq!(cfg.artifact.source, ArtifactSource::NetworkTrace);
        assert_eq!(cfg.webhook.timeout_secs, 30);
    }
}

//! Authpilot - LLM 驱动的网页登录自动化
//!
//! 模块划分：
//! - **agent**: 请求运行时（组件构建、提交、会话执行、结果投递）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、状态、请求模型、生命周期、会话监管、优雅关闭
//! - **integrations**: HTTP 接入层与 Webhook 投递
//! - **llm**: 决策引擎抽象与实现（Anthropic / Mock）及重试
//! - **memory**: 会话对话日志
//! - **react**: 决策循环、提示词、产物校验与提取
//! - **tools**: 浏览器自动化子进程客户端（MCP stdio）与工具目录

pub mod agent;
pub mod config;
pub mod core;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

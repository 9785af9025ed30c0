//! Webhook 投递
//!
//! 将终态结果 POST 到调用方提供的回调地址。网络错误、5xx 与 429 按指数退避重试，
//! 最多 max_attempts 次；其它 4xx 立即停止。每个请求 id 只会启动一次投递序列
//! （去重表只保留最近 dedup_capacity 个 id，更早的重复由生命周期的单次终态写入挡住）。
//! 投递失败只记录日志，不向上传播。

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::WebhookSection;
use crate::core::{RequestId, TerminalResult};

/// 回调负载：{success, result, error, iterations, request_id}
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub iterations: u32,
    pub request_id: RequestId,
}

impl WebhookPayload {
    pub fn from_terminal(request_id: &str, terminal: &TerminalResult) -> Self {
        Self {
            success: terminal.success,
            result: terminal.result.clone(),
            error: terminal.failure.map(|f| f.as_str().to_string()),
            iterations: terminal.iterations,
            request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    Delivered { attempts: u32, status: u16 },
    /// 非重试类 4xx
    Rejected { attempts: u32, status: u16 },
    Exhausted { attempts: u32, last_error: String },
    /// 该请求已启动过投递
    Duplicate,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryReport::Delivered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1).min(16)))
            .min(self.max_delay)
    }
}

impl From<&WebhookSection> for RetryPolicy {
    fn from(section: &WebhookSection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
        }
    }
}

/// 已启动投递的请求 id，超出容量时按插入顺序淘汰最旧的
#[derive(Debug)]
struct InitiatedIds {
    ids: HashSet<RequestId>,
    order: VecDeque<RequestId>,
    capacity: usize,
}

impl InitiatedIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 首次出现返回 true
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

pub struct WebhookDispatcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    initiated: Mutex<InitiatedIds>,
}

impl WebhookDispatcher {
    pub fn new(section: &WebhookSection) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build webhook client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            policy: RetryPolicy::from(section),
            initiated: Mutex::new(InitiatedIds::new(section.dedup_capacity)),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 去重表中保留的 id 数
    pub async fn tracked_ids(&self) -> usize {
        self.initiated.lock().await.len()
    }

    pub async fn deliver(&self, endpoint: &str, payload: &WebhookPayload) -> DeliveryReport {
        if !self.initiated.lock().await.insert(&payload.request_id) {
            tracing::warn!("Webhook delivery already initiated, skipping");
            return DeliveryReport::Duplicate;
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            match self.client.post(endpoint).json(payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        tracing::info!(attempt, status = status.as_u16(), "Webhook delivered");
                        return DeliveryReport::Delivered {
                            attempts: attempt,
                            status: status.as_u16(),
                        };
                    }
                    if status.is_client_error() && status.as_u16() != 429 {
                        tracing::error!(attempt, status = status.as_u16(), "Webhook rejected");
                        return DeliveryReport::Rejected {
                            attempts: attempt,
                            status: status.as_u16(),
                        };
                    }
                    last_error = format!("HTTP {}", status.as_u16());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.delay(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Webhook delivery failed ({}), retrying",
                    last_error
                );
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(
            attempts = self.policy.max_attempts,
            "Webhook delivery exhausted: {}",
            last_error
        );
        DeliveryReport::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        }
    }
}

//! 请求生命周期管理
//!
//! 每个请求 ID 一条记录（pending → processing → succeeded/failed），
//! 所有读写都通过 RequestRegistry 的窄接口；终态只允许写入一次。
//! 终态记录超过保留时长后在下一次 create 时被清理。

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::request::{LoginRequest, RequestId, TerminalResult};
use crate::core::RequestStatus;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Request not found: {0}")]
    NotFound(RequestId),

    #[error("Request already terminal: {0}")]
    AlreadyTerminal(RequestId),

    #[error("Duplicate request id: {0}")]
    Duplicate(RequestId),
}

/// 单个请求的记录
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request: LoginRequest,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub terminal_result: Option<TerminalResult>,
}

/// 对外状态视图（不含凭据）
#[derive(Debug, Clone, Serialize)]
pub struct RequestStatusView {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub error: Option<String>,
    pub iterations: Option<u32>,
}

impl From<&RequestRecord> for RequestStatusView {
    fn from(record: &RequestRecord) -> Self {
        let terminal = record.terminal_result.as_ref();
        Self {
            request_id: record.request.id.clone(),
            status: record.status,
            target_url: record.request.target_url.clone(),
            created_at: record.created_at,
            finished_at: record.finished_at,
            success: terminal.map(|t| t.success),
            error: terminal.and_then(|t| t.failure).map(|f| f.as_str().to_string()),
            iterations: terminal.map(|t| t.iterations),
        }
    }
}

/// 请求登记表：单一 RwLock 保护的 id -> 记录映射，持锁期间不跨 await
pub struct RequestRegistry {
    records: RwLock<HashMap<RequestId, RequestRecord>>,
    retention: Duration,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(24))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn create(&self, request: LoginRequest) -> Result<RequestId, LifecycleError> {
        let id = request.id.clone();
        let mut records = self.records.write().await;
        evict_expired(&mut records, self.retention);
        if records.contains_key(&id) {
            return Err(LifecycleError::Duplicate(id));
        }
        records.insert(
            id.clone(),
            RequestRecord {
                request,
                status: RequestStatus::Pending,
                created_at: Utc::now(),
                finished_at: None,
                terminal_result: None,
            },
        );
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<RequestRecord, LifecycleError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    pub async fn status_view(&self, id: &str) -> Result<RequestStatusView, LifecycleError> {
        self.records
            .read()
            .await
            .get(id)
            .map(RequestStatusView::from)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// pending -> processing；已终态的请求不可回退
    pub async fn mark_processing(&self, id: &str) -> Result<(), LifecycleError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal(id.to_string()));
        }
        record.status = RequestStatus::Processing;
        Ok(())
    }

    /// 写入终态；同一 id 的第二次终态写入被拒绝（幂等保护）
    pub async fn mark_terminal(
        &self,
        id: &str,
        outcome: TerminalResult,
    ) -> Result<(), LifecycleError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal(id.to_string()));
        }
        record.status = if outcome.success {
            RequestStatus::Succeeded
        } else {
            RequestStatus::Failed
        };
        record.finished_at = Some(Utc::now());
        record.terminal_result = Some(outcome);
        Ok(())
    }

    /// 清理超过保留时长的终态记录，返回清理数
    pub async fn prune_finished(&self) -> usize {
        evict_expired(&mut *self.records.write().await, self.retention)
    }

    /// 尚未终态的请求 id
    pub async fn unfinished_ids(&self) -> Vec<RequestId> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.request.id.clone())
            .collect()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// 尚未终态的请求数
    pub async fn active_count(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .count()
    }
}

fn evict_expired(records: &mut HashMap<RequestId, RequestRecord>, retention: Duration) -> usize {
    let cutoff = Utc::now() - retention;
    let before = records.len();
    records.retain(|_, r| match r.finished_at {
        Some(finished) if r.status.is_terminal() => finished > cutoff,
        _ => true,
    });
    let evicted = before - records.len();
    if evicted > 0 {
        tracing::debug!(evicted, "Evicted finished request records");
    }
    evicted
}

//! Headless 请求运行时
//!
//! components_from_config 按配置构建决策引擎、工具启动器、校验器、生命周期表与 Webhook 投递器；
//! submit 登记请求并在 TaskTracker 上派生会话任务；process_request 跑完会话、写入终态，
//! 且仅在终态写入成功时触发一次投递。shutdown_sessions 保证关闭时每个请求都有终态。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::{AppConfig, ArtifactSource};
use crate::core::{
    drain_sessions, AgentError, FailureReason, LoginRequest, RequestId, RequestRegistry,
    TerminalResult,
};
use crate::integrations::{DeliveryReport, WebhookDispatcher, WebhookPayload};
use crate::llm::{create_decision_engine, DecisionEngine};
use crate::react::{run_session, ResultValidator, SessionContext, SessionLimits, SessionOutcome};
use crate::tools::{McpLauncher, ToolLauncher};

/// 预构建的运行时组件，所有会话共享
pub struct AgentComponents {
    pub engine: Arc<dyn DecisionEngine>,
    pub launcher: Arc<dyn ToolLauncher>,
    pub validator: ResultValidator,
    pub artifact_source: ArtifactSource,
    pub limits: SessionLimits,
    pub mailbox_login_url: String,
    pub registry: Arc<RequestRegistry>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub tracker: TaskTracker,
    /// 关闭宽限期结束后取消仍在运行的会话
    pub session_cancel: CancellationToken,
}

pub fn components_from_config(config: &AppConfig) -> Result<AgentComponents, AgentError> {
    let engine = create_decision_engine(&config.llm)?;
    let launcher: Arc<dyn ToolLauncher> = Arc::new(McpLauncher::new(config.browser.clone()));
    Ok(AgentComponents::new(config, engine, launcher))
}

impl AgentComponents {
    pub fn new(
        config: &AppConfig,
        engine: Arc<dyn DecisionEngine>,
        launcher: Arc<dyn ToolLauncher>,
    ) -> Self {
        Self {
            engine,
            launcher,
            validator: ResultValidator::from_section(&config.validator),
            artifact_source: config.artifact.source,
            limits: SessionLimits::from(&config.agent),
            mailbox_login_url: config.agent.mailbox_login_url.clone(),
            registry: Arc::new(RequestRegistry::with_retention(chrono::Duration::seconds(
                config.server.request_retention_secs.min(u64::from(u32::MAX)) as i64,
            ))),
            dispatcher: Arc::new(WebhookDispatcher::new(&config.webhook)),
            tracker: TaskTracker::new(),
            session_cancel: CancellationToken::new(),
        }
    }

    /// 校验并登记请求，派生会话任务，立即返回请求 id
    pub async fn submit(self: &Arc<Self>, request: LoginRequest) -> Result<RequestId, AgentError> {
        request.validate()?;
        let id = self
            .registry
            .create(request)
            .await
            .map_err(|e| AgentError::InvalidRequest(e.to_string()))?;

        let span = tracing::info_span!("session", request_id = %id);
        let components = Arc::clone(self);
        let task_id = id.clone();
        self.tracker.spawn(
            async move {
                components.process_request(&task_id).await;
            }
            .instrument(span),
        );
        tracing::info!(request_id = %id, "Request accepted");
        Ok(id)
    }

    /// 运行一个已登记请求直到投递结束；请求不存在或已终态时返回 None
    pub async fn process_request(&self, id: &str) -> Option<DeliveryReport> {
        let record = match self.registry.get(id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Cannot process request: {}", e);
                return None;
            }
        };
        if let Err(e) = self.registry.mark_processing(id).await {
            tracing::warn!("Request not processable: {}", e);
            return None;
        }

        let outcome = self.run(&record.request).await;
        self.conclude(id, &record.request.callback_endpoint, outcome.terminal)
            .await
    }

    /// 唯一的终态出口：写入终态成功后才投递
    async fn conclude(
        &self,
        id: &str,
        endpoint: &str,
        terminal: TerminalResult,
    ) -> Option<DeliveryReport> {
        if let Err(e) = self.registry.mark_terminal(id, terminal.clone()).await {
            tracing::error!("Terminal outcome rejected, skipping webhook: {}", e);
            return None;
        }
        let payload = WebhookPayload::from_terminal(id, &terminal);
        Some(self.dispatcher.deliver(endpoint, &payload).await)
    }

    /// 关闭流程：先在 grace 内等待会话自然结束；超时则取消剩余会话，使其以
    /// service_shutdown 走正常终态与投递，并再等待 finalize；最后仍未终态的请求
    /// 由登记表直接收尾。返回直接收尾的请求数。
    pub async fn shutdown_sessions(&self, grace: Duration, finalize: Duration) -> usize {
        if !drain_sessions(&self.tracker, grace).await {
            tracing::warn!("Cancelling {} in-flight sessions", self.tracker.len());
            self.session_cancel.cancel();
            drain_sessions(&self.tracker, finalize).await;
        }

        let mut finalized = 0;
        for id in self.registry.unfinished_ids().await {
            let Ok(record) = self.registry.get(&id).await else {
                continue;
            };
            tracing::warn!(request_id = %id, "Finalizing request abandoned at shutdown");
            let terminal = TerminalResult::failed(FailureReason::ServiceShutdown, 0);
            if self
                .conclude(&id, &record.request.callback_endpoint, terminal)
                .await
                .is_some()
            {
                finalized += 1;
            }
        }
        finalized
    }

    async fn run(&self, request: &LoginRequest) -> SessionOutcome {
        let ctx = SessionContext {
            engine: self.engine.as_ref(),
            launcher: self.launcher.as_ref(),
            validator: &self.validator,
            artifact_source: self.artifact_source,
            limits: &self.limits,
            mailbox_login_url: &self.mailbox_login_url,
            shutdown: &self.session_cancel,
        };
        run_session(&ctx, request).await
    }
}

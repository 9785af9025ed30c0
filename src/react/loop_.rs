//! 会话决策循环（编排器）
//!
//! INIT -> LOOP_DECIDE -> LOOP_TOOL_DISPATCH -> VALIDATING -> DONE_SUCCESS | DONE_FAILURE。
//! 工具轮内严格按顺序执行；工具级失败写回对话，协议级失败立即终止。
//! 整个驱动过程与 deadline 竞争（select! 偏向 deadline），成功若在过期后才判定也记为 timeout；
//! 服务关闭取消会话时以 service_shutdown 结束。
//! 无论从哪条路径结束，工具会话都会被 shutdown，且只产出一个终态结果。

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AgentSection, ArtifactSource};
use crate::core::{
    AgentError, FailureReason, LoginRequest, RecoveryAction, RecoveryEngine, SessionPhase,
    SessionSupervisor, TerminalResult,
};
use crate::llm::{Decision, DecisionEngine};
use crate::memory::Conversation;
use crate::react::extractor::extract_cookies;
use crate::react::prompt::{login_task, reported_failure, system_prompt, PromptSettings};
use crate::react::validator::{ResultValidator, ValidationVerdict};
use crate::tools::{ToolExecutor, ToolInvocation, ToolLauncher, ToolSession};

/// 会话预算
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_iterations: u32,
    pub max_corrections: u32,
    pub session_timeout: Duration,
    pub honor_failure_marker: bool,
}

impl From<&AgentSection> for SessionLimits {
    fn from(section: &AgentSection) -> Self {
        Self {
            max_iterations: section.max_iterations,
            max_corrections: section.max_corrections,
            session_timeout: Duration::from_secs(section.session_timeout_secs),
            honor_failure_marker: section.honor_failure_marker,
        }
    }
}

/// 单个会话所需的协作者（均为借用，由 AgentComponents 持有）
pub struct SessionContext<'a> {
    pub engine: &'a dyn DecisionEngine,
    pub launcher: &'a dyn ToolLauncher,
    pub validator: &'a ResultValidator,
    pub artifact_source: ArtifactSource,
    pub limits: &'a SessionLimits,
    pub mailbox_login_url: &'a str,
    /// 服务关闭时由运行时取消
    pub shutdown: &'a CancellationToken,
}

/// 会话终态及计数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub terminal: TerminalResult,
    pub corrections: u32,
    /// 决策引擎被调用的次数
    pub decisions: u32,
}

struct SessionState {
    conversation: Conversation,
    phase: SessionPhase,
    iterations: u32,
    corrections: u32,
    decisions: u32,
}

impl SessionState {
    fn enter(&mut self, phase: SessionPhase) {
        tracing::debug!(from = %self.phase, to = %phase, iteration = self.iterations, "phase");
        self.phase = phase;
    }
}

/// 启动工具会话并运行到终态
pub async fn run_session(ctx: &SessionContext<'_>, request: &LoginRequest) -> SessionOutcome {
    let recovery = RecoveryEngine::new();

    let launched = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => {
            tracing::warn!("Service shutting down before the tool session started");
            return SessionOutcome {
                terminal: TerminalResult::failed(FailureReason::ServiceShutdown, 0),
                corrections: 0,
                decisions: 0,
            };
        }
        launched = ctx.launcher.launch(&request.id) => launched,
    };
    let mut session = match launched {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Tool session failed to start: {}", e);
            let reason = abort_reason(&recovery, &e);
            return SessionOutcome {
                terminal: TerminalResult::failed(reason, 0),
                corrections: 0,
                decisions: 0,
            };
        }
    };

    let validator = match &request.required_keys {
        Some(keys) => ctx.validator.with_required_keys(keys.clone()),
        None => ctx.validator.clone(),
    };
    let settings = PromptSettings {
        mailbox_login_url: ctx.mailbox_login_url.to_string(),
        artifact_source: ctx.artifact_source,
        delimiter: validator.delimiter().to_string(),
        required_keys: validator.required_keys().to_vec(),
    };

    // INIT
    let catalog = session.catalog().clone();
    let mut conversation = Conversation::new(catalog.entries().to_vec());
    conversation.push_system(system_prompt(&catalog));
    conversation.push_user(login_task(request, &settings));
    let mut state = SessionState {
        conversation,
        phase: SessionPhase::Init,
        iterations: 0,
        corrections: 0,
        decisions: 0,
    };
    let supervisor = SessionSupervisor::start(ctx.limits.session_timeout);
    tracing::info!(
        tools = catalog.len(),
        max_iterations = ctx.limits.max_iterations,
        timeout_secs = ctx.limits.session_timeout.as_secs(),
        "Session started"
    );

    let driven = {
        let driver = Driver {
            ctx,
            validator: &validator,
            recovery: &recovery,
            session: session.as_ref(),
            supervisor: &supervisor,
            request,
        };
        tokio::select! {
            biased;
            _ = supervisor.expired() => Err(FailureReason::Timeout),
            _ = ctx.shutdown.cancelled() => Err(FailureReason::ServiceShutdown),
            result = driver.drive(&mut state) => result,
        }
    };

    // 同一时刻检测到成功与过期时，过期优先
    let driven = match driven {
        Ok(_) if supervisor.is_expired() => Err(FailureReason::Timeout),
        other => other,
    };

    session.shutdown().await;

    let terminal = match driven {
        Ok(artifact) => {
            state.enter(SessionPhase::DoneSuccess);
            tracing::info!(
                iterations = state.iterations,
                corrections = state.corrections,
                "Session succeeded"
            );
            TerminalResult::succeeded(artifact, state.iterations)
        }
        Err(reason) => {
            state.enter(SessionPhase::DoneFailure);
            tracing::error!(
                reason = %reason,
                iterations = state.iterations,
                corrections = state.corrections,
                "Session failed"
            );
            TerminalResult::failed(reason, state.iterations)
        }
    };

    SessionOutcome {
        terminal,
        corrections: state.corrections,
        decisions: state.decisions,
    }
}

fn abort_reason(recovery: &RecoveryEngine, err: &AgentError) -> FailureReason {
    match recovery.handle(err) {
        RecoveryAction::Abort(reason) => reason,
        RecoveryAction::RetryWithPrompt(_) => FailureReason::InternalError,
    }
}

struct Driver<'s, 'a> {
    ctx: &'s SessionContext<'a>,
    validator: &'s ResultValidator,
    recovery: &'s RecoveryEngine,
    session: &'s dyn ToolSession,
    supervisor: &'s SessionSupervisor,
    request: &'s LoginRequest,
}

impl Driver<'_, '_> {
    async fn drive(&self, state: &mut SessionState) -> Result<String, FailureReason> {
        loop {
            if self.supervisor.is_expired() {
                return Err(FailureReason::Timeout);
            }
            state.enter(SessionPhase::LoopDecide);
            state.decisions += 1;

            let decision = match self.ctx.engine.decide(&state.conversation).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!("Decision engine call failed: {}", e);
                    return Err(abort_reason(self.recovery, &AgentError::from(e)));
                }
            };

            match decision {
                Decision::ToolCalls(calls) => self.dispatch(state, calls).await?,
                Decision::Final(answer) => {
                    if let Some(artifact) = self.finish(state, answer).await? {
                        return Ok(artifact);
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        state: &mut SessionState,
        calls: Vec<ToolInvocation>,
    ) -> Result<(), FailureReason> {
        if calls.is_empty() {
            tracing::error!("Decision engine returned an empty tool call list");
            return Err(FailureReason::DecisionEngineFailure);
        }
        if state.iterations >= self.ctx.limits.max_iterations {
            tracing::warn!(
                max_iterations = self.ctx.limits.max_iterations,
                "Iteration budget exhausted"
            );
            return Err(FailureReason::IterationBudgetExceeded);
        }

        state.enter(SessionPhase::LoopToolDispatch);
        state.conversation.push_tool_calls(&calls);

        let executor = ToolExecutor::new(self.session, &self.request.id);
        for call in &calls {
            match executor.execute(call).await {
                Ok(mut outcome) => {
                    if outcome.is_error {
                        tracing::warn!(tool = %call.name, "Tool returned an error");
                        let err = AgentError::ToolInvocation {
                            tool: call.name.clone(),
                            message: outcome.content.clone(),
                        };
                        if let RecoveryAction::RetryWithPrompt(feedback) = self.recovery.handle(&err) {
                            outcome.content = feedback;
                        }
                    }
                    state.conversation.push_tool_result(outcome);
                }
                Err(e) => {
                    tracing::error!(tool = %call.name, "Tool call aborted the session: {}", e);
                    return Err(abort_reason(self.recovery, &e));
                }
            }
        }

        state.iterations += 1;
        tracing::info!(iteration = state.iterations, calls = calls.len(), "Tool turn complete");
        Ok(())
    }

    /// 处理最终答复：Some(产物) 表示校验通过；None 表示已写入纠正反馈，需继续循环
    async fn finish(
        &self,
        state: &mut SessionState,
        answer: String,
    ) -> Result<Option<String>, FailureReason> {
        state.conversation.push_assistant_text(answer.clone());

        if self.ctx.limits.honor_failure_marker {
            if let Some(description) = reported_failure(&answer) {
                tracing::warn!(description, "Agent reported failure");
                return Err(FailureReason::AgentReportedFailure);
            }
        }

        state.enter(SessionPhase::Validating);
        let candidate = self.candidate_artifact(&answer).await;
        let verdict = match &candidate {
            Ok(artifact) => self.validator.validate(artifact),
            Err(reason) => ValidationVerdict::Fail {
                reason: reason.clone(),
            },
        };

        match (verdict, candidate) {
            (ValidationVerdict::Pass, Ok(artifact)) => Ok(Some(artifact)),
            (ValidationVerdict::Fail { reason }, _) => {
                if state.corrections >= self.ctx.limits.max_corrections {
                    tracing::warn!(reason = %reason, "Validation failed, corrections exhausted");
                    return Err(FailureReason::ValidationExhausted);
                }
                state.corrections += 1;
                tracing::warn!(
                    reason = %reason,
                    correction = state.corrections,
                    "Validation failed, sending feedback"
                );
                match self.recovery.handle(&AgentError::Validation(reason)) {
                    RecoveryAction::RetryWithPrompt(feedback) => {
                        state.conversation.push_user(feedback);
                        Ok(None)
                    }
                    RecoveryAction::Abort(reason) => Err(reason),
                }
            }
            (ValidationVerdict::Pass, Err(_)) => Err(FailureReason::InternalError),
        }
    }

    async fn candidate_artifact(&self, answer: &str) -> Result<String, String> {
        match self.ctx.artifact_source {
            ArtifactSource::Answer => Ok(answer.trim().to_string()),
            ArtifactSource::NetworkTrace => {
                let Some(profile) = self.session.profile_dir() else {
                    return Err("no browser profile available for trace extraction".to_string());
                };
                extract_cookies(profile, &self.request.target_url, self.validator.delimiter())
                    .await
                    .map_err(|e| format!("cookie extraction failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CredentialBundle;
    use crate::llm::{LlmError, ScriptedDecisionEngine, ScriptedStep};
    use crate::memory::{ContentBlock, Role};
    use crate::tools::{ScriptedLauncher, ScriptedReply, ScriptedToolSession};
    use serde_json::json;

    const GOOD: &str = "auth_token=abc; ct0=def";

    fn limits() -> SessionLimits {
        SessionLimits {
            max_iterations: 10,
            max_corrections: 2,
            session_timeout: Duration::from_secs(10),
            honor_failure_marker: true,
        }
    }

    fn request() -> LoginRequest {
        LoginRequest::new(
            "https://x.com/i/flow/login",
            CredentialBundle {
                email: "user@example.com".into(),
                mailbox_password: "mailpass".into(),
                username: Some("user".into()),
                password: Some("secret".into()),
            },
            "http://127.0.0.1:9/hook",
        )
    }

    fn validator() -> ResultValidator {
        ResultValidator::new("; ", vec!["auth_token".into(), "ct0".into()])
    }

    async fn run(
        engine: &ScriptedDecisionEngine,
        launcher: &ScriptedLauncher,
        limits: &SessionLimits,
    ) -> SessionOutcome {
        let validator = validator();
        let shutdown = CancellationToken::new();
        let ctx = SessionContext {
            engine,
            launcher,
            validator: &validator,
            artifact_source: ArtifactSource::Answer,
            limits,
            mailbox_login_url: "https://mail.example.com",
            shutdown: &shutdown,
        };
        run_session(&ctx, &request()).await
    }

    fn navigate() -> ScriptedStep {
        ScriptedStep::tool("browser_navigate", json!({"url": "https://x.com/i/flow/login"}))
    }

    fn type_password() -> ScriptedStep {
        ScriptedStep::tool("browser_type", json!({"element": "Password", "text": "secret"}))
    }

    #[tokio::test]
    async fn test_navigate_type_then_valid_artifact() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            navigate(),
            type_password(),
            ScriptedStep::Final(GOOD.into()),
        ]);

        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(outcome.terminal, TerminalResult::succeeded(GOOD.into(), 2));
        assert_eq!(outcome.corrections, 0);
        assert_eq!(session.calls(), vec!["browser_navigate", "browser_type"]);
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_tool_error_is_fed_back_and_session_recovers() {
        let session = ScriptedToolSession::browser()
            .with_reply("browser_click", ScriptedReply::ToolError("element not found".into()));
        let launcher = ScriptedLauncher::new(session.clone());
        let click = || ScriptedStep::tool("browser_click", json!({"element": "Next"}));
        let engine = ScriptedDecisionEngine::new(vec![
            click(),
            click(),
            ScriptedStep::Final(GOOD.into()),
        ]);

        let outcome = run(&engine, &launcher, &limits()).await;
        assert!(outcome.terminal.success);
        assert_eq!(outcome.terminal.iterations, 2);

        // 第二次决策时能看到第一次工具调用的错误结果
        let seen = engine.conversations();
        let last = seen[1].last().unwrap();
        assert_eq!(last.role, Role::Tool);
        match &last.blocks[0] {
            ContentBlock::ToolResult(result) => {
                assert!(result.is_error);
                assert!(result.content.contains("element not found"));
            }
            other => panic!("unexpected block: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_exhausted_after_corrections() {
        let launcher = ScriptedLauncher::new(ScriptedToolSession::browser());
        let engine = ScriptedDecisionEngine::new(vec![
            ScriptedStep::Final("auth_token=abc".into()),
            ScriptedStep::Final("not cookies".into()),
            ScriptedStep::Final("ct0=1".into()),
            ScriptedStep::Final(GOOD.into()),
        ]);

        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::ValidationExhausted, 0)
        );
        assert_eq!(outcome.corrections, 2);
        assert_eq!(engine.calls(), 3);

        // 纠正反馈包含原因但不包含产物值
        let feedback = engine.conversations()[1].last().unwrap().text_content();
        assert!(feedback.contains("missing required keys: ct0"));
        assert!(!feedback.contains("abc"));
    }

    #[tokio::test]
    async fn test_subprocess_crash_mid_call() {
        let session = ScriptedToolSession::browser()
            .with_reply("browser_snapshot", ScriptedReply::Crash);
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            ScriptedStep::tools(&[
                ("browser_snapshot", json!({})),
                ("browser_click", json!({"element": "Next"})),
            ]),
            ScriptedStep::Final(GOOD.into()),
        ]);

        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::ProtocolFailure, 0)
        );
        // 剩余调用被放弃，也不再请求决策
        assert_eq!(session.calls(), vec!["browser_snapshot"]);
        assert_eq!(engine.calls(), 1);
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_deadline_while_awaiting_decision() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            navigate(),
            ScriptedStep::Slow(Duration::from_secs(30), Box::new(ScriptedStep::Final(GOOD.into()))),
        ]);
        let limits = SessionLimits {
            session_timeout: Duration::from_millis(200),
            ..limits()
        };

        let started = std::time::Instant::now();
        let outcome = run(&engine, &launcher, &limits).await;
        assert_eq!(outcome.terminal, TerminalResult::failed(FailureReason::Timeout, 1));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_deadline_cancels_in_flight_tool_call() {
        let session = ScriptedToolSession::browser()
            .with_reply("browser_snapshot", ScriptedReply::Slow(Duration::from_secs(30)));
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            ScriptedStep::tool("browser_snapshot", json!({})),
            ScriptedStep::Final(GOOD.into()),
        ]);
        let limits = SessionLimits {
            session_timeout: Duration::from_millis(100),
            ..limits()
        };

        let started = std::time::Instant::now();
        let outcome = run(&engine, &launcher, &limits).await;
        assert_eq!(outcome.terminal, TerminalResult::failed(FailureReason::Timeout, 0));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(engine.calls(), 1);
        assert!(session.is_shut_down());
    }

    /// 第一轮请求导航；第二轮在 runtime 线程上阻塞越过 deadline 后才给出合法产物，
    /// 计时任务没有机会先触发
    struct LateAnswerEngine {
        calls: std::sync::atomic::AtomicU32,
        block_for: Duration,
    }

    #[async_trait::async_trait]
    impl DecisionEngine for LateAnswerEngine {
        async fn decide(&self, _conversation: &Conversation) -> Result<Decision, LlmError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                return Ok(Decision::ToolCalls(vec![ToolInvocation::new(
                    "c1",
                    "browser_navigate",
                    json!({"url": "https://x.com/i/flow/login"}),
                )]));
            }
            std::thread::sleep(self.block_for);
            Ok(Decision::Final(GOOD.into()))
        }
    }

    #[tokio::test]
    async fn test_expiry_wins_over_late_success() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = LateAnswerEngine {
            calls: std::sync::atomic::AtomicU32::new(0),
            block_for: Duration::from_millis(400),
        };
        let validator = validator();
        let limits = SessionLimits {
            session_timeout: Duration::from_millis(150),
            ..limits()
        };
        let shutdown = CancellationToken::new();
        let ctx = SessionContext {
            engine: &engine,
            launcher: &launcher,
            validator: &validator,
            artifact_source: ArtifactSource::Answer,
            limits: &limits,
            mailbox_login_url: "https://mail.example.com",
            shutdown: &shutdown,
        };

        let outcome = run_session(&ctx, &request()).await;
        assert_eq!(outcome.terminal, TerminalResult::failed(FailureReason::Timeout, 1));
        assert!(outcome.terminal.result.is_none());
        assert_eq!(outcome.decisions, 2);
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_service_shutdown_cancels_session() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            navigate(),
            ScriptedStep::Slow(Duration::from_secs(30), Box::new(ScriptedStep::Final(GOOD.into()))),
        ]);
        let validator = validator();
        let limits = limits();
        let shutdown = CancellationToken::new();
        let ctx = SessionContext {
            engine: &engine,
            launcher: &launcher,
            validator: &validator,
            artifact_source: ArtifactSource::Answer,
            limits: &limits,
            mailbox_login_url: "https://mail.example.com",
            shutdown: &shutdown,
        };
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = run_session(&ctx, &request()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::ServiceShutdown, 1)
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_iteration_budget() {
        let launcher = ScriptedLauncher::new(ScriptedToolSession::browser());
        let engine = ScriptedDecisionEngine::new(vec![
            navigate(),
            navigate(),
            navigate(),
            ScriptedStep::Final(GOOD.into()),
        ]);
        let limits = SessionLimits {
            max_iterations: 2,
            ..limits()
        };
        let outcome = run(&engine, &launcher, &limits).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::IterationBudgetExceeded, 2)
        );
        assert!(outcome.terminal.iterations <= limits.max_iterations);
    }

    #[tokio::test]
    async fn test_tool_calls_run_in_requested_order() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            ScriptedStep::tools(&[
                ("browser_type", json!({"element": "Email", "text": "user@example.com"})),
                ("browser_click", json!({"element": "Next"})),
                ("browser_snapshot", json!({})),
            ]),
            ScriptedStep::Final(GOOD.into()),
        ]);
        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(outcome.terminal.iterations, 1);
        assert_eq!(
            session.calls(),
            vec!["browser_type", "browser_click", "browser_snapshot"]
        );
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![
            ScriptedStep::tool("browser_teleport", json!({})),
            ScriptedStep::Final(GOOD.into()),
        ]);
        let outcome = run(&engine, &launcher, &limits()).await;
        assert!(outcome.terminal.success);
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_decision_engine_failure() {
        let session = ScriptedToolSession::browser();
        let launcher = ScriptedLauncher::new(session.clone());
        let engine = ScriptedDecisionEngine::new(vec![ScriptedStep::Fail(LlmError::Api {
            status: 401,
            message: "invalid key".into(),
        })]);
        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::DecisionEngineFailure, 0)
        );
        assert!(session.is_shut_down());
    }

    #[tokio::test]
    async fn test_agent_reported_failure() {
        let launcher = ScriptedLauncher::new(ScriptedToolSession::browser());
        let engine = ScriptedDecisionEngine::new(vec![
            navigate(),
            ScriptedStep::Final("TASK_FAILED: bot detection blocked login".into()),
        ]);
        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::AgentReportedFailure, 1)
        );
    }

    #[tokio::test]
    async fn test_launch_failure_is_protocol_failure() {
        let launcher = ScriptedLauncher::failing("handshake timed out");
        let engine = ScriptedDecisionEngine::new(vec![ScriptedStep::Final(GOOD.into())]);
        let outcome = run(&engine, &launcher, &limits()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::failed(FailureReason::ProtocolFailure, 0)
        );
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_network_trace_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let traces = dir.path().join("traces");
        std::fs::create_dir_all(&traces).unwrap();
        let line = json!({"snapshot": {"request": {
            "url": "https://x.com/api/1.1/account",
            "headers": [{"name": "cookie", "value": "auth_token=t; ct0=c"}]
        }}});
        std::fs::write(traces.join("run.network"), line.to_string()).unwrap();

        let session = ScriptedToolSession::browser().with_profile_dir(dir.path());
        let launcher = ScriptedLauncher::new(session);
        let engine = ScriptedDecisionEngine::new(vec![navigate(), ScriptedStep::Final("Login complete".into())]);
        let validator = validator();
        let limits = limits();
        let shutdown = CancellationToken::new();
        let ctx = SessionContext {
            engine: &engine,
            launcher: &launcher,
            validator: &validator,
            artifact_source: ArtifactSource::NetworkTrace,
            limits: &limits,
            mailbox_login_url: "https://mail.example.com",
            shutdown: &shutdown,
        };
        let outcome = run_session(&ctx, &request()).await;
        assert_eq!(
            outcome.terminal,
            TerminalResult::succeeded("auth_token=t; ct0=c".into(), 1)
        );
    }
}

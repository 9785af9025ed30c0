//! 浏览器自动化子进程客户端（MCP stdio）
//!
//! start 启动子进程并完成握手（initialize → notifications/initialized → tools/list），
//! invoke 发送一次带关联 id 的 tools/call 并等待匹配响应（单次超时转为工具级错误），
//! shutdown 关闭 stdin、杀死并回收子进程、中止 I/O 任务；Drop 兜底同样的释放。
//! Unix 上子进程独占一个进程组（npx → node → 浏览器），释放时整组发送 SIGKILL。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::BrowserSection;
use crate::core::AgentError;
use crate::tools::protocol::{
    call_result_is_error, call_result_text, initialize_params, IncomingMessage, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest,
};
use crate::tools::{ToolCatalog, ToolCatalogEntry, ToolInvocation, ToolLauncher, ToolOutcome, ToolSession};

/// stderr 最多保留的字符数（握手失败时附在日志里）
const STDERR_CAPTURE_LIMIT: usize = 4000;
/// 等待子进程退出的时间
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, JsonRpcError>>>>>;

/// 子进程启动参数（由 BrowserSection 与会话 profile 目录得出）
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub startup_timeout: Duration,
    pub tool_timeout: Duration,
    pub profile_dir: Option<PathBuf>,
    pub keep_profile: bool,
}

impl LaunchSpec {
    pub fn from_browser(cfg: &BrowserSection, profile_dir: &Path) -> Self {
        let mut args = Vec::new();
        if !cfg.package.is_empty() {
            args.push(cfg.package.clone());
        }
        args.push(format!("--browser={}", cfg.browser));
        if cfg.headless {
            args.push("--headless".to_string());
        }
        args.push(format!("--user-data-dir={}", profile_dir.display()));
        if cfg.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if let Some(ua) = cfg.user_agent.as_deref().filter(|ua| !ua.is_empty()) {
            args.push(format!("--user-agent={}", ua));
        }
        args.extend(cfg.extra_args.iter().cloned());

        let mut env = HashMap::new();
        if let Some(display) = cfg.display.as_deref().filter(|d| !d.is_empty()) {
            env.insert("DISPLAY".to_string(), display.to_string());
        }

        Self {
            command: cfg.command.clone(),
            args,
            env,
            startup_timeout: Duration::from_secs(cfg.startup_timeout_secs),
            tool_timeout: Duration::from_secs(cfg.tool_timeout_secs),
            profile_dir: Some(profile_dir.to_path_buf()),
            keep_profile: cfg.keep_profiles,
        }
    }
}

/// 单个会话独占的 MCP 子进程句柄
pub struct McpClient {
    child: Option<Child>,
    /// 子进程所在进程组（等于子进程 pid）
    process_group: Option<u32>,
    next_id: AtomicU64,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    tx_req: Option<mpsc::Sender<String>>,
    /// 同一句柄上同时只有一个调用在途
    call_lock: Mutex<()>,
    stderr: Arc<Mutex<String>>,
    io_tasks: Vec<JoinHandle<()>>,
    catalog: ToolCatalog,
    tool_timeout: Duration,
    profile_dir: Option<PathBuf>,
    keep_profile: bool,
}

impl McpClient {
    /// 启动子进程并握手；失败时子进程已被回收
    pub async fn start(spec: LaunchSpec) -> Result<Self, AgentError> {
        tracing::info!(command = %spec.command, "Starting browser automation subprocess");

        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Protocol(format!("failed to spawn {}: {}", spec.command, e)))?;
        let process_group = if cfg!(unix) { child.id() } else { None };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Protocol("failed to open subprocess stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Protocol("failed to open subprocess stdout".to_string()))?;
        let stderr_pipe = child.stderr.take();

        let (tx_req, mut rx_req) = mpsc::channel::<String>(32);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut io_tasks = Vec::new();

        // Writer
        io_tasks.push(tokio::spawn(async move {
            let mut writer = BufWriter::new(stdin);
            while let Some(msg) = rx_req.recv().await {
                tracing::debug!("MCP TX: {}", msg);
                if let Err(e) = writer.write_all(format!("{}\n", msg).as_bytes()).await {
                    tracing::error!("Failed to write to subprocess stdin: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    tracing::error!("Failed to flush subprocess stdin: {}", e);
                    break;
                }
            }
        }));

        // Reader
        let reader_pending = pending.clone();
        let reader_alive = alive.clone();
        io_tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&line, &reader_pending).await,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Failed to read subprocess stdout: {}", e);
                        break;
                    }
                }
            }
            tracing::warn!("Subprocess stdout closed");
            reader_alive.store(false, Ordering::SeqCst);
            // 丢弃所有在途请求的 sender，等待方收到 RecvError
            reader_pending.lock().await.clear();
        }));

        if let Some(stderr_pipe) = stderr_pipe {
            let stderr_log = stderr_buf.clone();
            io_tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr_pipe).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("MCP STDERR: {}", line);
                    let mut s = stderr_log.lock().await;
                    if s.len() < STDERR_CAPTURE_LIMIT {
                        s.push_str(&line);
                        s.push('\n');
                    }
                }
            }));
        }

        let mut client = Self {
            child: Some(child),
            process_group,
            next_id: AtomicU64::new(1),
            pending,
            alive,
            tx_req: Some(tx_req),
            call_lock: Mutex::new(()),
            stderr: stderr_buf,
            io_tasks,
            catalog: ToolCatalog::default(),
            tool_timeout: spec.tool_timeout,
            profile_dir: spec.profile_dir,
            keep_profile: spec.keep_profile,
        };

        let handshake = tokio::time::timeout(spec.startup_timeout, client.handshake()).await;
        let failure = match handshake {
            Ok(Ok(catalog)) => {
                tracing::info!(tools = ?catalog.tool_names(), "Subprocess handshake complete");
                client.catalog = catalog;
                return Ok(client);
            }
            Ok(Err(e)) => e,
            Err(_) => AgentError::Protocol(format!(
                "handshake did not complete within {}s",
                spec.startup_timeout.as_secs()
            )),
        };

        let stderr = client.stderr.lock().await.clone();
        tracing::error!("Subprocess handshake failed: {}. Stderr: {}", failure, stderr.trim());
        client.shutdown().await;
        Err(failure)
    }

    async fn handshake(&self) -> Result<ToolCatalog, AgentError> {
        let info = self
            .request(
                "initialize",
                Some(initialize_params(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
            )
            .await?
            .map_err(|e| AgentError::Protocol(format!("initialize rejected: {}", e.message)))?;
        tracing::debug!("Subprocess initialized: {}", info);

        self.notify("notifications/initialized").await?;

        let listed = self
            .request("tools/list", None)
            .await?
            .map_err(|e| AgentError::Protocol(format!("tools/list rejected: {}", e.message)))?;
        let tools = listed
            .get("tools")
            .cloned()
            .ok_or_else(|| AgentError::Protocol("malformed handshake: tools/list without tools".to_string()))?;
        let entries: Vec<ToolCatalogEntry> = serde_json::from_value(tools)
            .map_err(|e| AgentError::Protocol(format!("malformed handshake: {}", e)))?;
        ToolCatalog::from_entries(entries)
            .map_err(|e| AgentError::Protocol(format!("malformed handshake: {}", e)))
    }

    /// 发送请求并等待匹配的响应；外层 Result 为协议错误，内层为 JSON-RPC error
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Result<Value, JsonRpcError>, AgentError> {
        let rx = self.send_request(method, params).await?.1;
        rx.await.map_err(|_| {
            AgentError::Protocol(format!("subprocess exited while awaiting {}", method))
        })
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, JsonRpcError>>), AgentError> {
        let tx_req = self
            .tx_req
            .as_ref()
            .ok_or_else(|| AgentError::Protocol("client already shut down".to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| AgentError::Protocol(format!("failed to encode {}: {}", method, e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // reader 已退出时不会再清理新登记的请求
        if !self.alive.load(Ordering::SeqCst) {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::Protocol("subprocess is not running".to_string()));
        }

        if tx_req.send(payload).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::Protocol("subprocess stdin closed".to_string()));
        }
        Ok((id, rx))
    }

    async fn notify(&self, method: &str) -> Result<(), AgentError> {
        let tx_req = self
            .tx_req
            .as_ref()
            .ok_or_else(|| AgentError::Protocol("client already shut down".to_string()))?;
        let payload = serde_json::to_string(&JsonRpcNotification::new(method))
            .map_err(|e| AgentError::Protocol(format!("failed to encode {}: {}", method, e)))?;
        tx_req
            .send(payload)
            .await
            .map_err(|_| AgentError::Protocol("subprocess stdin closed".to_string()))
    }

    /// 执行一次 tools/call
    pub async fn call_tool(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError> {
        let _guard = self.call_lock.lock().await;
        let started = Instant::now();

        let params = serde_json::json!({
            "name": invocation.name,
            "arguments": invocation.arguments,
        });
        let (id, rx) = self.send_request("tools/call", Some(params)).await?;

        match tokio::time::timeout(self.tool_timeout, rx).await {
            Ok(Ok(Ok(result))) => {
                let content = call_result_text(&result);
                if call_result_is_error(&result) {
                    Ok(ToolOutcome::error(&invocation.call_id, content))
                } else {
                    Ok(ToolOutcome::ok(&invocation.call_id, content))
                }
            }
            Ok(Ok(Err(rpc_error))) => Ok(ToolOutcome::error(
                &invocation.call_id,
                format!("Error {}: {}", rpc_error.code, rpc_error.message),
            )),
            Ok(Err(_)) => Err(AgentError::Protocol(format!(
                "subprocess exited during {} after {}ms",
                invocation.name,
                started.elapsed().as_millis()
            ))),
            Err(_) => {
                // 迟到的响应会被 reader 当作未知 id 丢弃
                self.pending.lock().await.remove(&id);
                Ok(ToolOutcome::error(
                    &invocation.call_id,
                    format!(
                        "Error: tool {} timed out after {}s",
                        invocation.name,
                        self.tool_timeout.as_secs()
                    ),
                ))
            }
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// 子进程是否仍在运行（stdout 未关闭）
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// 释放子进程与 I/O；可重复调用
    pub async fn shutdown(&mut self) {
        // 关闭 stdin 写端
        self.tx_req.take();

        if let Some(pgid) = self.process_group.take() {
            kill_process_group(pgid).await;
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Subprocess already exited: {}", e);
            }
            match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => tracing::info!("Subprocess exited: {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to reap subprocess: {}", e),
                Err(_) => tracing::warn!("Subprocess did not exit within {}s", REAP_TIMEOUT.as_secs()),
            }
        }

        for task in self.io_tasks.drain(..) {
            task.abort();
        }
        self.alive.store(false, Ordering::SeqCst);
        self.pending.lock().await.clear();

        if let Some(dir) = self.profile_dir.take() {
            if !self.keep_profile {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => tracing::debug!("Removed browser profile {}", dir.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => tracing::warn!("Failed to remove browser profile {}: {}", dir.display(), e),
                }
            }
        }
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
        // Child 设置了 kill_on_drop，只覆盖直接子进程；其余进程组成员在这里清理
        if let Some(pgid) = self.process_group.take() {
            kill_process_group_blocking(pgid);
        }
        if let Some(dir) = self.profile_dir.take() {
            if !self.keep_profile {
                let _ = std::fs::remove_dir_all(dir);
            }
        }
    }
}

/// 向整个进程组发送 SIGKILL（组内进程可能已退出，失败只记 debug）
#[cfg(unix)]
async fn kill_process_group(pgid: u32) {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pgid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(s) if s.success() => tracing::debug!(pgid, "Killed subprocess group"),
        Ok(s) => tracing::debug!(pgid, "Subprocess group already gone ({})", s),
        Err(e) => tracing::warn!(pgid, "Failed to signal subprocess group: {}", e),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pgid: u32) {}

#[cfg(unix)]
fn kill_process_group_blocking(pgid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-KILL", "--", &format!("-{}", pgid)])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn kill_process_group_blocking(_pgid: u32) {}

async fn dispatch_line(line: &str, pending: &PendingMap) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<IncomingMessage>(line) {
        Ok(msg) => match msg.response_id() {
            Some(id) => {
                let waiter = pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let reply = match msg.error {
                            Some(err) => Err(err),
                            None => Ok(msg.result.unwrap_or(Value::Null)),
                        };
                        let _ = tx.send(reply);
                    }
                    None => tracing::warn!("Dropping response for unknown request id {}", id),
                }
            }
            None => tracing::debug!("MCP RX (non-response): {}", line),
        },
        Err(_) => tracing::warn!("Unparsed MCP RX: {}", line),
    }
}

#[async_trait]
impl ToolSession for McpClient {
    fn catalog(&self) -> &ToolCatalog {
        McpClient::catalog(self)
    }

    fn profile_dir(&self) -> Option<&Path> {
        self.profile_dir.as_deref()
    }

    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, AgentError> {
        self.call_tool(invocation).await
    }

    async fn shutdown(&mut self) {
        McpClient::shutdown(self).await
    }
}

/// 为每个会话创建独立 profile 目录并启动 McpClient
pub struct McpLauncher {
    browser: BrowserSection,
}

impl McpLauncher {
    pub fn new(browser: BrowserSection) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl ToolLauncher for McpLauncher {
    async fn launch(&self, session_id: &str) -> Result<Box<dyn ToolSession>, AgentError> {
        let profile_dir = self.browser.profile_root.join(session_id);
        tokio::fs::create_dir_all(&profile_dir).await.map_err(|e| {
            AgentError::Protocol(format!(
                "failed to create browser profile {}: {}",
                profile_dir.display(),
                e
            ))
        })?;
        let profile_dir = tokio::fs::canonicalize(&profile_dir).await.unwrap_or(profile_dir);

        let spec = LaunchSpec::from_browser(&self.browser, &profile_dir);
        match McpClient::start(spec).await {
            Ok(client) => Ok(Box::new(client)),
            Err(e) => {
                if !self.browser.keep_profiles {
                    let _ = tokio::fs::remove_dir_all(&profile_dir).await;
                }
                Err(e)
            }
        }
    }
}

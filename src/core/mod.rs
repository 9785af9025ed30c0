//! 核心层：错误与恢复、状态、请求模型、生命周期、会话监管、优雅关闭

pub mod error;
pub mod lifecycle;
pub mod recovery;
pub mod request;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use error::{AgentError, FailureReason, RecoveryAction};
pub use lifecycle::{LifecycleError, RequestRecord, RequestRegistry, RequestStatusView};
pub use recovery::RecoveryEngine;
pub use request::{CredentialBundle, LoginRequest, RequestId, TerminalResult};
pub use session_supervisor::SessionSupervisor;
pub use shutdown::{drain_sessions, ShutdownManager};
pub use state::{RequestStatus, SessionPhase};

//! 状态定义：会话阶段与请求状态
//!
//! SessionPhase 只在单个会话内部流转；RequestStatus 由 Lifecycle Manager 维护并对外查询。

use std::fmt;

use serde::Serialize;

/// 决策循环阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    LoopDecide,
    LoopToolDispatch,
    Validating,
    DoneSuccess,
    DoneFailure,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::DoneSuccess | SessionPhase::DoneFailure)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Init => "INIT",
            SessionPhase::LoopDecide => "LOOP_DECIDE",
            SessionPhase::LoopToolDispatch => "LOOP_TOOL_DISPATCH",
            SessionPhase::Validating => "VALIDATING",
            SessionPhase::DoneSuccess => "DONE_SUCCESS",
            SessionPhase::DoneFailure => "DONE_FAILURE",
        };
        f.write_str(s)
    }
}

/// 请求状态（Lifecycle Manager 投影）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Succeeded | RequestStatus::Failed)
    }
}

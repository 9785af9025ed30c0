//! 认知层：会话决策循环、登录任务提示词、产物校验与 trace 提取

pub mod extractor;
pub mod loop_;
pub mod prompt;
pub mod validator;

pub use extractor::{extract_cookies, ExtractError};
pub use loop_::{run_session, SessionContext, SessionLimits, SessionOutcome};
pub use prompt::{PromptSettings, FAILURE_MARKER};
pub use validator::{ResultValidator, ValidationVerdict};

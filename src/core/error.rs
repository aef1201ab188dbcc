//! 引擎错误类型
//!
//! 与 RecoveryEngine 配合：可恢复的步骤错误（校验失败、工具失败、超时）交给恢复分类，
//! 其余（迭代超限、未知恢复策略、计划成环、取消）为致命错误，直接终止当前任务。

use thiserror::Error;

/// 任务生命周期中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 工具缺少必填字段（如 file_read 缺 path）
    #[error("Step '{step}' ({action}) is missing required field '{field}'")]
    MissingField {
        step: String,
        action: String,
        field: &'static str,
    },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Max iterations exceeded ({0})")]
    MaxIterationsExceeded(usize),

    #[error("Unknown recovery strategy: {0}")]
    UnknownRecoveryStrategy(String),

    /// 步骤声明 allow_recovery = false，失败后不再进入恢复
    #[error("Step '{step}' failed without recovery: {reason}")]
    RecoveryDisallowed { step: String, reason: String },

    #[error("Plan dependency error: {0}")]
    PlanCycle(String),

    /// 显式步骤列表格式错误
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Agent runtime has been shut down")]
    ShutDown,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

impl AgentError {
    /// 致命错误不参与恢复分类
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::MaxIterationsExceeded(_)
                | AgentError::UnknownRecoveryStrategy(_)
                | AgentError::RecoveryDisallowed { .. }
                | AgentError::PlanCycle(_)
                | AgentError::InvalidPlan(_)
                | AgentError::Cancelled
                | AgentError::ShutDown
        )
    }
}

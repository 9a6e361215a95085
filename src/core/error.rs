//! 错误类型
//!
//! - ToolError：外部依赖的失败，瞬时错误由 RetryPolicy 处理，Fatal 不重试
//! - AgentError：Agent 边界之外的意外故障，只在 Orchestrator 处被捕获
//! - FlowError：让单个 flow 中止的原因（Agent 故障 / 取消 / 超时）

use std::time::Duration;

use thiserror::Error;

use crate::agents::AgentKind;
use crate::core::retry::RetryableError;

/// 外部工具（抓取、LLM、告警、下单）返回的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("service error: {0}")]
    Service(String),

    /// 非瞬时故障：不重试，直接上抛为 AgentError
    #[error("fatal tool fault: {0}")]
    Fatal(String),
}

impl RetryableError for ToolError {
    fn is_retryable(&self) -> bool {
        !matches!(self, ToolError::Fatal(_))
    }
}

/// Agent 无法以降级结果表达的故障
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("{agent}: malformed payload: {reason}")]
    MalformedPayload { agent: AgentKind, reason: String },

    #[error("{agent}: {reason}")]
    Fatal { agent: AgentKind, reason: String },

    #[error("{agent} panicked: {reason}")]
    Panicked { agent: AgentKind, reason: String },
}

/// 中止 flow 的原因
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("flow cancelled")]
    Cancelled,

    #[error("flow timed out after {0:?}")]
    TimedOut(Duration),
}

//! 核心编排层：错误、重试、熔断、状态存储、flow 生命周期、主控编排器

pub mod circuit_breaker;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod retry;
pub mod state;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use error::{AgentError, FlowError, ToolError};
pub use flow::{Flow, FlowPhase, FlowResult, FlowStatus, StepOutcome};
pub use orchestrator::{FlowRequest, Orchestrator, OrchestratorBuilder};
pub use retry::{RetryPolicy, RetryableError};
pub use state::StateStore;

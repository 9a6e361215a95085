//! Hive - 多 Agent 编排核心
//!
//! 一个 Orchestrator 把 Retriever -> Enricher -> Planner -> Executor -> Notifier 串成固定流水线，
//! 在共享状态之上提供重试退避、熔断、检查点回滚、幂等执行与安全闸。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、重试、熔断、状态存储、flow 状态机、编排器
//! - **agents**: 五个 Agent 与统一的 AgentResult 契约
//! - **tools**: 外部依赖接口（文档、LLM、告警、下单）与模拟 / 脚本化实现
//! - **observability**: 日志初始化、审计流水、流程计数器

pub mod agents;
pub mod config;
pub mod core;
pub mod observability;
pub mod tools;

pub use crate::core::{FlowRequest, FlowResult, FlowStatus, Orchestrator, OrchestratorBuilder};

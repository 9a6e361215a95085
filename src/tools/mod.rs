//! 外部依赖：文档抓取、LLM、告警、下单
//!
//! 编排核心只通过这几个窄接口使用它们：异步、可能失败、除返回值外没有对核心可见的副作用。
//! - sim：按配置的延迟与失败率模拟真实依赖
//! - scripted：确定性的测试替身（一直成功 / 一直失败 / 先失败 N 次 / 致命故障），带调用计数

pub mod scripted;
pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ToolsSection;
use crate::core::ToolError;

/// 文档来源
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch_documents(&self, query: &str) -> Result<Vec<String>, ToolError>;
}

/// LLM 客户端：prompt -> 文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Normal,
    High,
}

/// 告警 / 通知通道，返回对端是否确认
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_alert(&self, message: &str, priority: AlertPriority) -> Result<bool, ToolError>;
}

/// 下单请求；idempotency_key 透传给交易端做去重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub quantity: u32,
    pub note: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: String,
    pub status: String,
}

/// 下单网关
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderConfirmation, ToolError>;
}

/// 一个 Orchestrator 用到的全部外部依赖
#[derive(Clone)]
pub struct Toolbox {
    pub documents: Arc<dyn DocumentSource>,
    pub llm: Arc<dyn LlmClient>,
    pub alerts: Arc<dyn AlertChannel>,
    pub orders: Arc<dyn OrderGateway>,
}

impl Toolbox {
    pub fn new(
        documents: Arc<dyn DocumentSource>,
        llm: Arc<dyn LlmClient>,
        alerts: Arc<dyn AlertChannel>,
        orders: Arc<dyn OrderGateway>,
    ) -> Self {
        Self {
            documents,
            llm,
            alerts,
            orders,
        }
    }

    /// 全部使用模拟实现
    pub fn simulated(cfg: &ToolsSection) -> Self {
        Self::new(
            Arc::new(sim::SimulatedDocumentSource::new(cfg.fetch.clone().into())),
            Arc::new(sim::SimulatedLlm::new(cfg.llm.clone().into())),
            Arc::new(sim::SimulatedAlertChannel::new(cfg.alert.clone().into())),
            Arc::new(sim::SimulatedOrderGateway::new(cfg.order.clone().into())),
        )
    }
}

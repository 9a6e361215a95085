//! 模拟外部依赖：随机延迟 + 按概率失败
//!
//! 默认参数取自配置 [tools.*]：抓取 7%、LLM 5%、告警 3%、下单 5% 的失败率。

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;

use crate::config::FaultSection;
use crate::core::ToolError;
use crate::tools::{
    AlertChannel, AlertPriority, DocumentSource, LlmClient, OrderConfirmation, OrderGateway,
    OrderRequest,
};

/// 延迟区间与失败概率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultProfile {
    pub failure_rate: f64,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl From<FaultSection> for FaultProfile {
    fn from(section: FaultSection) -> Self {
        Self {
            failure_rate: section.failure_rate,
            min_latency: Duration::from_millis(section.min_latency_ms),
            max_latency: Duration::from_millis(section.max_latency_ms),
        }
    }
}

impl FaultProfile {
    /// 不失败、不延迟
    pub fn reliable() -> Self {
        Self {
            failure_rate: 0.0,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
        }
    }

    fn latency(&self) -> Duration {
        if self.max_latency <= self.min_latency {
            return self.min_latency;
        }
        let ms = rand::thread_rng()
            .gen_range(self.min_latency.as_millis() as u64..=self.max_latency.as_millis() as u64);
        Duration::from_millis(ms)
    }

    fn roll_failure(&self) -> bool {
        self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate.min(1.0))
    }

    /// 模拟一次 I/O：先等待，再按概率失败
    async fn io(&self) -> bool {
        let delay = self.latency();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.roll_failure()
    }
}

pub struct SimulatedDocumentSource {
    profile: FaultProfile,
}

impl SimulatedDocumentSource {
    pub fn new(profile: FaultProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl DocumentSource for SimulatedDocumentSource {
    async fn fetch_documents(&self, query: &str) -> Result<Vec<String>, ToolError> {
        if self.profile.io().await {
            return Err(ToolError::Connectivity(
                "document service unavailable".to_string(),
            ));
        }
        let count = rand::thread_rng().gen_range(1..=4);
        Ok((1..=count).map(|i| format!("Doc({query})#{i}")).collect())
    }
}

pub struct SimulatedLlm {
    profile: FaultProfile,
}

impl SimulatedLlm {
    pub fn new(profile: FaultProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl LlmClient for SimulatedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, ToolError> {
        if self.profile.io().await {
            return Err(ToolError::Timeout("LLM timeout".to_string()));
        }
        let head: String = prompt.chars().take(120).collect();
        Ok(format!("LLM_SUMMARY: {head}"))
    }
}

pub struct SimulatedAlertChannel {
    profile: FaultProfile,
}

impl SimulatedAlertChannel {
    pub fn new(profile: FaultProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl AlertChannel for SimulatedAlertChannel {
    async fn send_alert(&self, message: &str, priority: AlertPriority) -> Result<bool, ToolError> {
        if self.profile.io().await {
            return Err(ToolError::Service(
                "notification service failed".to_string(),
            ));
        }
        tracing::debug!(?priority, "[Alert] {}", message);
        Ok(true)
    }
}

pub struct SimulatedOrderGateway {
    profile: FaultProfile,
}

impl SimulatedOrderGateway {
    pub fn new(profile: FaultProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl OrderGateway for SimulatedOrderGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderConfirmation, ToolError> {
        if self.profile.io().await {
            return Err(ToolError::Service("order failed: API error".to_string()));
        }
        tracing::debug!(quantity = order.quantity, "[Order] filled");
        Ok(OrderConfirmation {
            order_id: format!("ORD-{}", rand::thread_rng().gen_range(10000..=99999)),
            status: "filled".to_string(),
        })
    }
}

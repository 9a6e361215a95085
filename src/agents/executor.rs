//! Executor：按计划执行副作用（升级告警 / 下单），以幂等键保证同一请求最多执行一次
//!
//! 执行记录写在 `exec_done_<key>` 下，存在即视为已执行：重放直接返回记录，不再调用任何工具。
//! 首次执行与重放的 data 里 `execution` 字段完全相同，下游只应读取这个字段。

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};

use crate::agents::{payload_of, str_field, Agent, AgentKind, AgentResult, Payload, Plan, PlanAction};
use crate::config::ExecutorSection;
use crate::core::{AgentError, RetryPolicy, StateStore, ToolError};
use crate::observability::{AuditEvent, AuditLog};
use crate::tools::{AlertChannel, AlertPriority, OrderGateway, OrderRequest};

/// 执行记录键的前缀
pub const EXEC_RECORD_PREFIX: &str = "exec_done_";

/// 幂等记录的键
pub fn exec_record_key(idempotency_key: &str) -> String {
    format!("{EXEC_RECORD_PREFIX}{idempotency_key}")
}

/// 交易分支的安全闸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeSafety {
    pub trading_enabled: bool,
    pub order_quantity: u32,
    pub max_order_quantity: u32,
}

impl Default for TradeSafety {
    fn default() -> Self {
        (&ExecutorSection::default()).into()
    }
}

impl From<&ExecutorSection> for TradeSafety {
    fn from(section: &ExecutorSection) -> Self {
        Self {
            trading_enabled: section.trading_enabled,
            order_quantity: section.order_quantity,
            max_order_quantity: section.max_order_quantity,
        }
    }
}

impl TradeSafety {
    /// 交易开启且数量不超过上限
    pub fn allows_trade(&self) -> bool {
        self.trading_enabled && self.order_quantity <= self.max_order_quantity
    }
}

pub struct ExecutorAgent {
    alerts: Arc<dyn AlertChannel>,
    orders: Arc<dyn OrderGateway>,
    safety: TradeSafety,
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
}

impl ExecutorAgent {
    pub fn new(
        alerts: Arc<dyn AlertChannel>,
        orders: Arc<dyn OrderGateway>,
        safety: TradeSafety,
        state: Arc<StateStore>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            alerts,
            orders,
            safety,
            state,
            audit,
            retry,
        }
    }

    async fn execute(&self, plan: &Plan, idempotency_key: &str) -> Result<Value, ToolError> {
        match plan.action {
            PlanAction::Escalate => {
                let message = format!("ESCALATION: {}", plan.summary_snippet);
                self.retry
                    .run("send_alert", || {
                        self.alerts.send_alert(&message, AlertPriority::High)
                    })
                    .await?;
                let ticket = rand::thread_rng().gen_range(1000..=9999);
                Ok(json!({ "status": "escalated", "ticket_id": format!("TKT-{ticket}") }))
            }
            PlanAction::RecommendTrade if !self.safety.allows_trade() => {
                tracing::warn!(
                    "[Executor] trade blocked by safety check (enabled={}, quantity={}, max={})",
                    self.safety.trading_enabled,
                    self.safety.order_quantity,
                    self.safety.max_order_quantity
                );
                Ok(json!({ "status": "blocked", "reason": "safety_check" }))
            }
            PlanAction::RecommendTrade => {
                let order = OrderRequest {
                    quantity: self.safety.order_quantity,
                    note: format!("TRADE_EXECUTE: {}", plan.summary_snippet),
                    idempotency_key: idempotency_key.to_string(),
                };
                let confirmation = self
                    .retry
                    .run("place_order", || self.orders.place_order(&order))
                    .await?;
                Ok(json!({ "status": "trade_executed", "order_id": confirmation.order_id }))
            }
            PlanAction::Inform | PlanAction::NoAction => Ok(json!({ "status": "no_action" })),
        }
    }
}

#[async_trait]
impl Agent for ExecutorAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Executor
    }

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError> {
        let idempotency_key = str_field(payload, "idempotency_key")
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let record_key = exec_record_key(&idempotency_key);

        if let Some(record) = self.state.get(&record_key) {
            tracing::info!(
                "[Executor] idempotent replay detected for {}, skipping",
                idempotency_key
            );
            return Ok(AgentResult::success(payload_of(json!({
                "result": "already_executed",
                "execution": record,
                "idempotency_key": idempotency_key,
            }))));
        }

        let plan = payload.get("plan").and_then(Plan::from_value).unwrap_or_else(|| {
            tracing::warn!("[Executor] missing or unknown plan action, treating as no_action");
            Plan {
                action: PlanAction::NoAction,
                summary_snippet: String::new(),
                matched_keyword: None,
            }
        });

        match self.execute(&plan, &idempotency_key).await {
            Ok(result) => {
                let execution = if self.state.set_if_absent(&record_key, result.clone()) {
                    result
                } else {
                    // 并发的同键请求已先提交，以先提交的记录为准
                    tracing::warn!(
                        "[Executor] concurrent execution for {}, keeping the first record",
                        idempotency_key
                    );
                    self.state.get_or(&record_key, result)
                };
                self.audit.record(
                    AuditEvent::ExecutorSuccess,
                    json!({ "idempotency_key": idempotency_key, "result": execution }),
                );
                Ok(AgentResult::success(payload_of(json!({
                    "result": execution,
                    "execution": execution,
                    "idempotency_key": idempotency_key,
                }))))
            }
            Err(e) => {
                tracing::error!("[Executor] {} failed: {}", plan.action, e);
                self.audit.record(
                    AuditEvent::ExecutorError,
                    json!({ "idempotency_key": idempotency_key, "error": e.to_string() }),
                );
                if let ToolError::Fatal(_) = e {
                    return Err(AgentError::Fatal {
                        agent: self.kind(),
                        reason: e.to_string(),
                    });
                }
                Ok(AgentResult::degraded(
                    payload_of(json!({ "result": null })),
                    e.to_string(),
                ))
            }
        }
    }
}

//! Notifier：尽力而为地发送最终通知，失败时排队等人工重发
//!
//! 告警通道返回 Fatal 时同样降级并写入 pending_notification，不让 flow 失败（此时执行记录已落盘）。
//! 这一点与 Executor 不同：Executor 遇到 Fatal 直接上抛。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::agents::{payload_of, str_field, truncate_chars, Agent, AgentKind, AgentResult, Payload};
use crate::core::{AgentError, RetryPolicy, StateStore};
use crate::observability::{AuditEvent, AuditLog};
use crate::tools::{AlertChannel, AlertPriority};

pub const LAST_NOTIFICATION_KEY: &str = "last_notification";
pub const PENDING_NOTIFICATION_KEY: &str = "pending_notification";

pub struct NotifierAgent {
    alerts: Arc<dyn AlertChannel>,
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
}

impl NotifierAgent {
    pub fn new(
        alerts: Arc<dyn AlertChannel>,
        state: Arc<StateStore>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            alerts,
            state,
            audit,
            retry,
        }
    }
}

fn build_message(summary: &str, execution: &Value) -> String {
    format!(
        "Notification: exec_result={} | summary={}",
        execution,
        truncate_chars(summary, 200)
    )
}

#[async_trait]
impl Agent for NotifierAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Notifier
    }

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError> {
        let summary = str_field(payload, "summary").unwrap_or_default();
        let execution = payload.get("execution_result").cloned().unwrap_or(Value::Null);
        let message = build_message(summary, &execution);

        let sent = self
            .retry
            .run("send_notification", || {
                self.alerts.send_alert(&message, AlertPriority::Normal)
            })
            .await;

        match sent {
            Ok(_) => {
                self.state.set(
                    LAST_NOTIFICATION_KEY,
                    json!({ "message": message, "ts": Utc::now().to_rfc3339() }),
                );
                self.audit
                    .record(AuditEvent::NotifierSent, json!({ "message": message }));
                Ok(AgentResult::success(payload_of(json!({ "notified": true }))))
            }
            Err(e) => {
                tracing::error!("[Notifier] notification failed, queued for manual retry: {}", e);
                self.audit
                    .record(AuditEvent::NotifierFailed, json!({ "error": e.to_string() }));
                self.state.set(
                    PENDING_NOTIFICATION_KEY,
                    json!({ "message": message, "ts": Utc::now().to_rfc3339() }),
                );
                Ok(AgentResult::degraded(
                    payload_of(json!({ "notified": false })),
                    e.to_string(),
                ))
            }
        }
    }
}

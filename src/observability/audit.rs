//! 审计流水
//!
//! 只追加的 `{ts, event, payload}` 序列。每条记录同时以 info 级别写入 tracing（target = "audit"），
//! 并转发给注册的 AuditSink（外部落盘、上报等由调用方注入）。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// 审计事件名
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    FlowStarted,
    RetrieverSuccess,
    RetrieverError,
    EnricherSuccess,
    EnricherError,
    PlannerDecision,
    ExecutorSuccess,
    ExecutorError,
    NotifierSent,
    NotifierFailed,
    CheckpointCreated,
    CheckpointRollback,
    ExecutionFallback,
    FlowCompleted,
    FlowFailed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::FlowStarted => "flow_started",
            AuditEvent::RetrieverSuccess => "retriever_success",
            AuditEvent::RetrieverError => "retriever_error",
            AuditEvent::EnricherSuccess => "enricher_success",
            AuditEvent::EnricherError => "enricher_error",
            AuditEvent::PlannerDecision => "planner_decision",
            AuditEvent::ExecutorSuccess => "executor_success",
            AuditEvent::ExecutorError => "executor_error",
            AuditEvent::NotifierSent => "notifier_sent",
            AuditEvent::NotifierFailed => "notifier_failed",
            AuditEvent::CheckpointCreated => "checkpoint_created",
            AuditEvent::CheckpointRollback => "checkpoint_rollback",
            AuditEvent::ExecutionFallback => "execution_fallback",
            AuditEvent::FlowCompleted => "flow_completed",
            AuditEvent::FlowFailed => "flow_failed",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条审计记录
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub ts: DateTime<Utc>,
    pub event: AuditEvent,
    pub payload: Value,
}

/// 审计输出端：实现方不得 panic，记录失败自行吞掉
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// 进程内审计日志：内存累积 + 可注入的外部 sink
#[derive(Default)]
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    sinks: Mutex<Vec<Arc<dyn AuditSink>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册额外的输出端
    pub fn add_sink(&self, sink: Arc<dyn AuditSink>) {
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// 追加一条记录
    pub fn record(&self, event: AuditEvent, payload: Value) {
        let entry = AuditEntry {
            ts: Utc::now(),
            event,
            payload,
        };
        tracing::info!(target: "audit", event = %entry.event, payload = %entry.payload, "[AUDIT]");

        let sinks = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            sink.record(&entry);
        }

        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 最近 n 条
    pub fn tail(&self, n: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    /// 某类事件出现的次数
    pub fn count(&self, event: AuditEvent) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event == event)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CollectingSink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for CollectingSink {
        fn record(&self, entry: &AuditEntry) {
            self.0.lock().unwrap().push(entry.event);
        }
    }

    #[test]
    fn test_record_appends_in_order() {
        let log = AuditLog::new();
        log.record(AuditEvent::FlowStarted, json!({"flow_id": "a"}));
        log.record(AuditEvent::FlowCompleted, json!({"flow_id": "a"}));

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, AuditEvent::FlowStarted);
        assert_eq!(entries[1].event, AuditEvent::FlowCompleted);
        assert_eq!(log.count(AuditEvent::FlowStarted), 1);
    }

    #[test]
    fn test_sinks_receive_every_entry() {
        let log = AuditLog::new();
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        log.add_sink(sink.clone());

        log.record(AuditEvent::PlannerDecision, json!({"decision": "inform"}));
        log.record(AuditEvent::NotifierSent, json!({}));

        let seen = sink.0.lock().unwrap().clone();
        assert_eq!(seen, vec![AuditEvent::PlannerDecision, AuditEvent::NotifierSent]);
    }

    #[test]
    fn test_tail_and_serialized_event_name() {
        let log = AuditLog::new();
        for _ in 0..5 {
            log.record(AuditEvent::CheckpointCreated, json!({}));
        }
        log.record(AuditEvent::CheckpointRollback, json!({"name": "start_x"}));

        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].event, AuditEvent::CheckpointRollback);

        let encoded = serde_json::to_value(&tail[1]).unwrap();
        assert_eq!(encoded["event"], "checkpoint_rollback");
        assert_eq!(encoded["payload"]["name"], "start_x");
        assert_eq!(log.tail(100).len(), 6);
    }
}

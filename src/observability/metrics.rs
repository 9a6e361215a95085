//! 流程计数器

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// 每个 Orchestrator 一份：已启动 / 已完成 / 已失败的 flow 数
#[derive(Debug, Default)]
pub struct Metrics {
    flows_started: AtomicU64,
    flows_succeeded: AtomicU64,
    flows_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub flows_started: u64,
    pub flows_succeeded: u64,
    pub flows_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_started(&self) {
        self.flows_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flow_succeeded(&self) {
        self.flows_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flow_failed(&self) {
        self.flows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            flows_started: self.flows_started.load(Ordering::Relaxed),
            flows_succeeded: self.flows_succeeded.load(Ordering::Relaxed),
            flows_failed: self.flows_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.flow_started();
        metrics.flow_started();
        metrics.flow_succeeded();
        metrics.flow_failed();

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                flows_started: 2,
                flows_succeeded: 1,
                flows_failed: 1,
            }
        );
    }
}

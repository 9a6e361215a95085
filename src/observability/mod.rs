//! 可观测性：日志初始化、审计流水、流程计数器

pub mod audit;
pub mod metrics;

pub use audit::{AuditEntry, AuditEvent, AuditLog, AuditSink};
pub use metrics::{Metrics, MetricsSnapshot};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖；重复调用时忽略
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

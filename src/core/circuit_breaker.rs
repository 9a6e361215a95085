//! 熔断器：按依赖名统计连续失败
//!
//! Closed -> (连续失败达到阈值) -> Open -> (recovery_timeout 过去) -> HalfOpen。
//! HalfOpen 时放行下一次调用：成功则 record_success 回到 Closed，失败则立即重新打开。
//! 时间取自 tokio::time::Instant，测试里可以 pause / advance。

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerSection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct BreakerInner {
    fails: u32,
    open_until: Option<Instant>,
}

/// 由 Orchestrator 持有、所有 flow 共享，反映依赖真实的运行历史
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    fail_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, fail_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            fail_threshold: fail_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn from_config(name: impl Into<String>, section: &BreakerSection) -> Self {
        Self::new(
            name,
            section.fail_threshold,
            Duration::from_secs(section.recovery_timeout_secs),
        )
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.fails = 0;
        inner.open_until = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.fails += 1;
        if inner.fails >= self.fail_threshold {
            let until = Instant::now() + self.recovery_timeout;
            inner.open_until = Some(until);
            tracing::error!(
                "[CircuitBreaker:{}] Opened for {:?} after {} consecutive failures",
                self.name,
                self.recovery_timeout,
                inner.fails
            );
        }
    }

    /// 仅在 now < open_until 期间为 true
    pub fn is_open(&self) -> bool {
        self.lock()
            .open_until
            .map_or(false, |until| Instant::now() < until)
    }

    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.open_until {
            Some(until) if Instant::now() < until => BreakerState::Open,
            Some(_) => BreakerState::HalfOpen,
            None => BreakerState::Closed,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().fails
    }
}

//! 带指数退避与抖动的有界重试
//!
//! 第 n 次重试前等待 `min(max_backoff, initial_backoff * 2^(n-1) * jitter)`，jitter ∈ [0.9, 1.1)。
//! 被包装的操作最多调用 `retries + 1` 次，重试耗尽后返回最后一次的错误。

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::config::RetrySection;

/// 可判断是否值得重试的错误；默认都重试
pub trait RetryableError: fmt::Display {
    fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self::new(
            section.retries,
            Duration::from_millis(section.initial_backoff_ms),
            Duration::from_millis(section.max_backoff_ms),
        )
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            retries,
            initial_backoff,
            max_backoff,
            jitter: true,
        }
    }

    /// 关闭抖动，退避时长完全确定（测试用）
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// 第 attempt 次重试（从 1 开始）前的等待时长
    pub fn backoff(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_backoff.as_secs_f64() * 2f64.powi(exponent) * jitter;
        let capped = secs.min(self.max_backoff.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    fn next_backoff(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter {
            rand::thread_rng().gen_range(0.9..1.1)
        } else {
            1.0
        };
        self.backoff(attempt, jitter)
    }

    /// 执行操作，失败按策略重试
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.run_observed(op_name, op, |_, _, _| {}).await
    }

    /// 同 run，每次重试前回调 on_retry(attempt, &error, backoff)；回调无返回值，不会打断重试
    pub async fn run_observed<T, E, F, Fut, O>(
        &self,
        op_name: &str,
        mut op: F,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
        O: FnMut(u32, &E, Duration),
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt > self.retries {
                        return Err(e);
                    }
                    let backoff = self.next_backoff(attempt);
                    tracing::warn!(
                        "Retry {}/{} for {} after {:.2}s due to: {}",
                        attempt,
                        self.retries,
                        op_name,
                        backoff.as_secs_f64(),
                        e
                    );
                    on_retry(attempt, &e, backoff);
                    sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy::new(retries, Duration::from_millis(10), Duration::from_millis(80))
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_on_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy(3)
            .run("op", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(42)
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast_policy(3)
            .run("op", || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ToolError::Connectivity("flaky".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_at_most_retries_plus_one() {
        for retries in [0u32, 1, 2, 5] {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let result: Result<(), ToolError> = fast_policy(retries)
                .run("op", || async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(ToolError::Service(format!("attempt {n}")))
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
            // 返回的是最后一次的错误
            assert_eq!(
                result,
                Err(ToolError::Service(format!("attempt {}", retries + 1)))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), ToolError> = fast_policy(3)
            .run("op", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::Fatal("bad state".into()))
            })
            .await;

        assert!(matches!(result, Err(ToolError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_each_retry() {
        let mut seen = Vec::new();
        let _: Result<(), ToolError> = fast_policy(2)
            .without_jitter()
            .run_observed(
                "op",
                || async { Err(ToolError::Timeout("slow".into())) },
                |attempt, err, backoff| seen.push((attempt, err.to_string(), backoff)),
            )
            .await;

        assert_eq!(
            seen,
            vec![
                (1, "timeout: slow".to_string(), Duration::from_millis(10)),
                (2, "timeout: slow".to_string(), Duration::from_millis(20)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_sleep_matches_backoff_schedule() {
        let policy = fast_policy(3).without_jitter();
        let start = tokio::time::Instant::now();
        let _: Result<(), ToolError> = policy
            .run("op", || async { Err(ToolError::Service("down".into())) })
            .await;

        // 10 + 20 + 40 ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(70));
        assert!(elapsed < Duration::from_millis(75));
    }

    #[test]
    fn test_backoff_monotonic_until_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(200), Duration::from_secs(5));
        for jitter in [0.9, 1.0, 1.0999] {
            let mut previous = Duration::ZERO;
            for attempt in 1..=10 {
                let delay = policy.backoff(attempt, jitter);
                assert!(delay >= previous);
                assert!(delay <= policy.max_backoff());
                previous = delay;
            }
            assert_eq!(previous, Duration::from_secs(5));
        }
    }

    #[test]
    fn test_backoff_values() {
        let policy = RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(5));
        assert_eq!(policy.backoff(1, 1.0), Duration::from_millis(200));
        assert_eq!(policy.backoff(2, 1.0), Duration::from_millis(400));
        assert_eq!(policy.backoff(3, 1.0), Duration::from_millis(800));
        assert_eq!(policy.backoff(100, 1.0), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_from_config_section() {
        let section = RetrySection {
            retries: 1,
            initial_backoff_ms: 50,
            max_backoff_ms: 60,
        };
        let policy = RetryPolicy::from(&section);
        assert_eq!(policy.retries(), 1);
        assert_eq!(policy.max_backoff(), Duration::from_millis(60));
        assert_eq!(policy.backoff(1, 1.0), Duration::from_millis(50));
        assert_eq!(policy.backoff(2, 1.0), Duration::from_millis(60));

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), ToolError> = policy
            .run("op", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::Timeout("slow".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), policy.retries() + 1);
    }
}

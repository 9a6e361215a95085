//! Retriever：熔断器保护下抓取文档，失败时退回缓存

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agents::{payload_of, str_field, Agent, AgentKind, AgentResult, Payload};
use crate::core::{AgentError, CircuitBreaker, RetryPolicy, StateStore};
use crate::observability::{AuditEvent, AuditLog};
use crate::tools::DocumentSource;

/// 共享键：最近一次成功抓取的文档
pub const CACHED_DOCS_KEY: &str = "cached_docs";

pub struct RetrieverAgent {
    source: Arc<dyn DocumentSource>,
    breaker: Arc<CircuitBreaker>,
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
}

impl RetrieverAgent {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        breaker: Arc<CircuitBreaker>,
        state: Arc<StateStore>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            breaker,
            state,
            audit,
            retry,
        }
    }

    fn cached_docs(&self) -> Value {
        self.state.get_or(CACHED_DOCS_KEY, json!([]))
    }
}

#[async_trait]
impl Agent for RetrieverAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Retriever
    }

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError> {
        let query = str_field(payload, "query").ok_or_else(|| AgentError::MalformedPayload {
            agent: self.kind(),
            reason: "missing string field 'query'".to_string(),
        })?;

        if self.breaker.is_open() {
            tracing::warn!(
                "[Retriever] circuit '{}' open, skipping fetch and using cached docs",
                self.breaker.name()
            );
            return Ok(AgentResult::success(payload_of(json!({
                "docs": self.cached_docs(),
                "source": "cache",
            }))));
        }

        let fetched = self
            .retry
            .run("fetch_documents", || self.source.fetch_documents(query))
            .await;

        match fetched {
            Ok(docs) => {
                self.breaker.record_success();
                self.state.set(CACHED_DOCS_KEY, json!(docs));
                self.audit.record(
                    AuditEvent::RetrieverSuccess,
                    json!({ "query": query, "docs_count": docs.len() }),
                );
                Ok(AgentResult::success(payload_of(json!({
                    "docs": docs,
                    "source": "live",
                }))))
            }
            Err(e) => {
                self.breaker.record_failure();
                tracing::error!("[Retriever] fetch failed for '{}': {}", query, e);
                self.audit.record(
                    AuditEvent::RetrieverError,
                    json!({ "query": query, "error": e.to_string() }),
                );
                Ok(AgentResult::degraded(
                    payload_of(json!({
                        "docs": self.cached_docs(),
                        "source": "fallback",
                    })),
                    e.to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::scripted::{Script, ScriptedDocuments};
    use std::time::Duration;

    struct Fixture {
        docs: Arc<ScriptedDocuments>,
        breaker: Arc<CircuitBreaker>,
        state: Arc<StateStore>,
        audit: Arc<AuditLog>,
        agent: RetrieverAgent,
    }

    fn fixture(script: Script, fail_threshold: u32) -> Fixture {
        let docs = Arc::new(ScriptedDocuments::new(script));
        let breaker = Arc::new(CircuitBreaker::new(
            "doc_service",
            fail_threshold,
            Duration::from_secs(20),
        ));
        let audit = Arc::new(AuditLog::new());
        let state = Arc::new(StateStore::new(audit.clone()));
        let agent = RetrieverAgent::new(
            docs.clone(),
            breaker.clone(),
            state.clone(),
            audit.clone(),
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50)),
        );
        Fixture {
            docs,
            breaker,
            state,
            audit,
            agent,
        }
    }

    fn query(q: &str) -> Payload {
        payload_of(json!({ "query": q }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_fetch_updates_cache() {
        let f = fixture(Script::AlwaysOk, 4);
        let result = f.agent.run(&query("payments")).await.unwrap();

        assert!(result.ok());
        assert_eq!(result.data()["source"], "live");
        assert_eq!(
            result.data()["docs"],
            json!(["Doc(payments)#1", "Doc(payments)#2"])
        );
        assert_eq!(f.state.get(CACHED_DOCS_KEY), Some(result.data()["docs"].clone()));
        assert_eq!(f.audit.count(AuditEvent::RetrieverSuccess), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_falls_back_to_cache() {
        let f = fixture(Script::AlwaysFail, 4);
        f.state.set(CACHED_DOCS_KEY, json!(["old doc"]));

        let result = f.agent.run(&query("payments")).await.unwrap();

        assert!(!result.ok());
        assert!(result.error().unwrap().contains("cannot fetch"));
        assert_eq!(result.data()["source"], "fallback");
        assert_eq!(result.data()["docs"], json!(["old doc"]));
        assert_eq!(f.docs.calls(), 3);
        assert_eq!(f.breaker.failure_count(), 1);
        assert_eq!(f.audit.count(AuditEvent::RetrieverError), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_cache_yields_empty_docs() {
        let f = fixture(Script::AlwaysFail, 4);
        let result = f.agent.run(&query("q")).await.unwrap();
        assert_eq!(result.data()["docs"], json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_serves_cache_without_fetching() {
        let f = fixture(Script::AlwaysFail, 1);
        f.agent.run(&query("q")).await.unwrap();
        assert!(f.breaker.is_open());
        let calls_before = f.docs.calls();

        f.state.set(CACHED_DOCS_KEY, json!(["cached"]));
        let result = f.agent.run(&query("q")).await.unwrap();

        assert!(result.ok());
        assert_eq!(result.data()["source"], "cache");
        assert_eq!(result.data()["docs"], json!(["cached"]));
        assert_eq!(f.docs.calls(), calls_before);
        // 短路不计入失败
        assert_eq!(f.breaker.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_breaker() {
        let f = fixture(Script::FailTimes(3), 4);
        // 第一次：3 次调用全失败
        f.agent.run(&query("q")).await.unwrap();
        assert_eq!(f.breaker.failure_count(), 1);
        // 第二次：第 4 次调用成功
        let result = f.agent.run(&query("q")).await.unwrap();
        assert!(result.ok());
        assert_eq!(f.breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_query_is_malformed() {
        let f = fixture(Script::AlwaysOk, 4);
        let err = f.agent.run(&Payload::new()).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::MalformedPayload {
                agent: AgentKind::Retriever,
                ..
            }
        ));
        assert_eq!(f.docs.calls(), 0);
    }
}

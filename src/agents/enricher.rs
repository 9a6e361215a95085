//! Enricher：调用 LLM 生成摘要，失败时退回朴素拼接摘要

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::agents::{payload_of, str_list_field, truncate_chars, Agent, AgentKind, AgentResult, Payload};
use crate::core::{AgentError, RetryPolicy, StateStore};
use crate::observability::{AuditEvent, AuditLog};
use crate::tools::LlmClient;

pub const LAST_SUMMARY_KEY: &str = "last_summary";

/// 进入 prompt 的文档数上限
const PROMPT_DOCS: usize = 5;
/// 朴素摘要的字符上限
const NAIVE_SUMMARY_CHARS: usize = 240;

pub struct EnricherAgent {
    llm: Arc<dyn LlmClient>,
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
    retry: RetryPolicy,
}

impl EnricherAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        state: Arc<StateStore>,
        audit: Arc<AuditLog>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            state,
            audit,
            retry,
        }
    }
}

fn build_prompt(docs: &[String]) -> String {
    let head: Vec<&str> = docs.iter().take(PROMPT_DOCS).map(String::as_str).collect();
    format!("Summarize: {}", head.join(" "))
}

/// 全部文档空格拼接，超过 240 字符时截断并追加 "..."
fn naive_summary(docs: &[String]) -> String {
    let joined = docs.join(" ");
    if joined.chars().count() > NAIVE_SUMMARY_CHARS {
        format!("{}...", truncate_chars(&joined, NAIVE_SUMMARY_CHARS))
    } else {
        joined
    }
}

#[async_trait]
impl Agent for EnricherAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Enricher
    }

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError> {
        let docs = str_list_field(payload, "docs");
        if docs.is_empty() {
            tracing::warn!("[Enricher] no docs to summarize");
            return Ok(AgentResult::degraded(
                payload_of(json!({ "summary": "" })),
                "no_docs",
            ));
        }

        let prompt = build_prompt(&docs);
        let completed = self
            .retry
            .run("llm_complete", || self.llm.complete(&prompt))
            .await;

        match completed {
            Ok(summary) => {
                self.audit
                    .record(AuditEvent::EnricherSuccess, json!({ "docs_count": docs.len() }));
                self.state.set(LAST_SUMMARY_KEY, json!(summary));
                Ok(AgentResult::success(payload_of(json!({ "summary": summary }))))
            }
            Err(e) => {
                tracing::error!("[Enricher] LLM failed: {}", e);
                self.audit
                    .record(AuditEvent::EnricherError, json!({ "error": e.to_string() }));
                Ok(AgentResult::degraded(
                    payload_of(json!({ "summary": naive_summary(&docs) })),
                    e.to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::scripted::{Script, ScriptedLlm};
    use std::time::Duration;

    fn agent(llm: Arc<ScriptedLlm>) -> (EnricherAgent, Arc<StateStore>, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new());
        let state = Arc::new(StateStore::new(audit.clone()));
        let agent = EnricherAgent::new(
            llm,
            state.clone(),
            audit.clone(),
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(50)),
        );
        (agent, state, audit)
    }

    fn docs(items: &[&str]) -> Payload {
        payload_of(json!({ "docs": items }))
    }

    #[tokio::test]
    async fn test_empty_docs_is_no_docs() {
        let llm = Arc::new(ScriptedLlm::new(Script::AlwaysOk));
        let (agent, _, _) = agent(llm.clone());

        let result = agent.run(&docs(&[])).await.unwrap();

        assert!(!result.ok());
        assert_eq!(result.error(), Some("no_docs"));
        assert_eq!(result.data()["summary"], "");
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_uses_first_five_docs() {
        let llm = Arc::new(ScriptedLlm::new(Script::AlwaysOk));
        let (agent, state, audit) = agent(llm);

        let result = agent
            .run(&docs(&["a", "b", "c", "d", "e", "f"]))
            .await
            .unwrap();

        assert!(result.ok());
        assert_eq!(result.data()["summary"], "Summarize: a b c d e");
        assert_eq!(state.get(LAST_SUMMARY_KEY), Some(json!("Summarize: a b c d e")));
        assert_eq!(audit.count(AuditEvent::EnricherSuccess), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_builds_naive_summary() {
        let llm = Arc::new(ScriptedLlm::new(Script::AlwaysFail));
        let (agent, state, audit) = agent(llm.clone());

        let result = agent.run(&docs(&["first", "second"])).await.unwrap();

        assert!(!result.ok());
        assert_eq!(result.data()["summary"], "first second");
        assert_eq!(llm.calls(), 3);
        assert!(!state.contains(LAST_SUMMARY_KEY));
        assert_eq!(audit.count(AuditEvent::EnricherError), 1);
    }

    #[test]
    fn test_naive_summary_truncates_long_text() {
        let long = "x".repeat(300);
        let summary = naive_summary(&[long]);
        assert_eq!(summary.chars().count(), NAIVE_SUMMARY_CHARS + 3);
        assert!(summary.ends_with("..."));

        let exact = "y".repeat(NAIVE_SUMMARY_CHARS);
        assert_eq!(naive_summary(&[exact.clone()]), exact);
    }
}

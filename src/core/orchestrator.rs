//! 编排器：把五个 Agent 串成固定流水线
//!
//! 每个 flow：计数 + 审计 -> 检查点 start_<id> -> Retriever -> Enricher -> Planner -> Executor -> Notifier。
//! Agent 的 `ok = false` 不会中断流水线，降级数据照常向后传；只有意外故障（Agent 返回 Err、panic、
//! 取消、超时）才走失败路径：回滚到 start_<id>，写 manual_ticket，返回 failed，从不向调用方抛错。
//!
//! 多个 flow 可以在同一个任务上并发（join_all），共享 StateStore 与熔断器。
//! 回滚保留其他 flow 在此期间写下的执行记录（`exec_done_*`），其余键整体回到检查点。
//!
//! flow 结束后删除 start_<id>；end_<id> 只保留最近一个，检查点数量不随 flow 数增长。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agents::{
    Agent, AgentKind, AgentResult, EnricherAgent, ExecutorAgent, NotifierAgent, Payload,
    PlannerAgent, RetrieverAgent, TradeSafety,
};
use crate::agents::executor::{exec_record_key, EXEC_RECORD_PREFIX};
use crate::config::AppConfig;
use crate::core::flow::{Flow, FlowPhase, FlowResult};
use crate::core::{AgentError, CircuitBreaker, FlowError, RetryPolicy, StateStore};
use crate::observability::{AuditEvent, AuditLog, AuditSink, Metrics, MetricsSnapshot};
use crate::tools::Toolbox;

/// 文档服务熔断器的名字
pub const DOC_SERVICE: &str = "doc_service";

pub const MANUAL_REVIEW_KEY: &str = "manual_review";
pub const MANUAL_TICKET_KEY: &str = "manual_ticket";

/// run_flows 的单个请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRequest {
    pub query: String,
    pub idempotency_key: Option<String>,
}

impl FlowRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

pub struct Orchestrator {
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
    metrics: Metrics,
    doc_breaker: Arc<CircuitBreaker>,
    /// 按 AgentKind::PIPELINE 顺序
    agents: [Arc<dyn Agent>; 5],
    flow_timeout: Option<Duration>,
    /// 最近一次成功 flow 的 end_<id> 检查点
    last_end_checkpoint: Mutex<Option<String>>,
}

impl Orchestrator {
    /// 使用模拟外部依赖
    pub fn new(config: &AppConfig) -> Self {
        Self::builder(config.clone()).build()
    }

    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn doc_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.doc_breaker
    }

    fn agent(&self, kind: AgentKind) -> &Arc<dyn Agent> {
        &self.agents[kind as usize]
    }

    pub async fn run_flow(&self, query: &str, idempotency_key: Option<&str>) -> FlowResult {
        self.run_flow_with_cancel(query, idempotency_key, CancellationToken::new())
            .await
    }

    /// 同 run_flow；token 被取消或超过 flow 超时时，按意外故障处理（回滚 + 工单）
    pub async fn run_flow_with_cancel(
        &self,
        query: &str,
        idempotency_key: Option<&str>,
        cancel: CancellationToken,
    ) -> FlowResult {
        let mut flow = Flow::new(query, idempotency_key.map(str::to_string));
        let flow_id = flow.id().to_string();

        self.metrics.flow_started();
        self.audit.record(
            AuditEvent::FlowStarted,
            json!({ "flow_id": flow_id, "query": query, "idempotency_key": idempotency_key }),
        );
        let start_checkpoint = format!("start_{flow_id}");
        self.state.checkpoint(&start_checkpoint);

        let outcome = {
            let pipeline = self.drive(&mut flow);
            let bounded = async {
                match self.flow_timeout {
                    Some(limit) => match tokio::time::timeout(limit, pipeline).await {
                        Ok(res) => res.map_err(FlowError::from),
                        Err(_) => Err(FlowError::TimedOut(limit)),
                    },
                    None => pipeline.await.map_err(FlowError::from),
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FlowError::Cancelled),
                res = bounded => res,
            }
        };

        match outcome {
            Ok(execution) => {
                self.metrics.flow_succeeded();
                self.state.drop_checkpoint(&start_checkpoint);
                self.replace_end_checkpoint(format!("end_{flow_id}"));
                self.audit.record(
                    AuditEvent::FlowCompleted,
                    json!({ "flow_id": flow_id, "execution_result": execution }),
                );
                tracing::info!("[Orchestrator] flow {} completed", flow_id);
                flow.complete(execution)
            }
            Err(e) => self.fail_flow(flow, &start_checkpoint, e),
        }
    }

    fn replace_end_checkpoint(&self, name: String) {
        self.state.checkpoint(&name);
        let previous = self
            .last_end_checkpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(name);
        if let Some(previous) = previous {
            self.state.drop_checkpoint(&previous);
        }
    }

    /// 在当前任务上并发运行多个 flow，结果顺序与请求一致
    pub async fn run_flows(&self, requests: &[FlowRequest]) -> Vec<FlowResult> {
        join_all(
            requests
                .iter()
                .map(|r| self.run_flow(&r.query, r.idempotency_key.as_deref())),
        )
        .await
    }

    fn fail_flow(&self, flow: Flow, start_checkpoint: &str, error: FlowError) -> FlowResult {
        let reason = error.to_string();
        self.metrics.flow_failed();
        tracing::error!(
            "[Orchestrator] unhandled fault in flow {} during {}: {}",
            flow.id(),
            flow.phase(),
            reason
        );
        self.audit.record(
            AuditEvent::FlowFailed,
            json!({ "flow_id": flow.id(), "error": reason }),
        );
        let own_record = flow.idempotency_key().map(exec_record_key);
        self.state.rollback_keeping(start_checkpoint, |key| {
            key.starts_with(EXEC_RECORD_PREFIX) && Some(key) != own_record.as_deref()
        });
        self.state.drop_checkpoint(start_checkpoint);
        self.state.set(
            MANUAL_TICKET_KEY,
            json!({ "flow_id": flow.id(), "error": reason, "ts": Utc::now().to_rfc3339() }),
        );
        flow.fail(reason)
    }

    /// 正常路径：依次运行五个 Agent，返回执行结果
    async fn drive(&self, flow: &mut Flow) -> Result<Value, AgentError> {
        let mut payload = Payload::new();
        payload.insert("query".into(), json!(flow.query()));

        let retrieved = self.run_step(flow, AgentKind::Retriever, &payload).await?;
        let docs_count = retrieved
            .data()
            .get("docs")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let source = retrieved
            .data()
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(
            "[Orchestrator] retrieved {} docs (source={})",
            docs_count,
            source
        );
        payload.extend(retrieved.into_data());

        let enriched = self.run_step(flow, AgentKind::Enricher, &payload).await?;
        payload.extend(enriched.into_data());

        let planned = self.run_step(flow, AgentKind::Planner, &payload).await?;
        payload.extend(planned.into_data());
        let plan = payload.get("plan").cloned().unwrap_or(Value::Null);
        tracing::info!("[Orchestrator] plan={}", plan);

        payload.insert(
            "idempotency_key".into(),
            flow.idempotency_key().map_or(Value::Null, |k| json!(k)),
        );
        let executed = self.run_step(flow, AgentKind::Executor, &payload).await?;
        if !executed.ok() {
            let error = executed.error().unwrap_or("unknown_error");
            tracing::warn!(
                "[Orchestrator] execution had issues in flow {}, flagged for manual review",
                flow.id()
            );
            self.audit.record(
                AuditEvent::ExecutionFallback,
                json!({ "flow_id": flow.id(), "plan": plan, "error": error }),
            );
            self.state.set(
                MANUAL_REVIEW_KEY,
                json!({ "flow_id": flow.id(), "plan": plan, "error": error }),
            );
        }
        let execution = executed
            .data()
            .get("execution")
            .cloned()
            .unwrap_or(Value::Null);
        payload.extend(executed.into_data());
        payload.insert("execution_result".into(), execution.clone());

        let notified = self.run_step(flow, AgentKind::Notifier, &payload).await?;
        if !notified.ok() {
            tracing::warn!("[Orchestrator] notification queued for manual retry");
        }

        Ok(execution)
    }

    /// 运行单个 Agent：panic 转为 AgentError::Panicked，步骤结果记入 flow
    async fn run_step(
        &self,
        flow: &mut Flow,
        kind: AgentKind,
        payload: &Payload,
    ) -> Result<AgentResult, AgentError> {
        flow.enter(FlowPhase::running(kind));
        let outcome = match AssertUnwindSafe(self.agent(kind).run(payload))
            .catch_unwind()
            .await
        {
            Ok(res) => res,
            Err(panic) => Err(AgentError::Panicked {
                agent: kind,
                reason: panic_message(&*panic),
            }),
        };

        match &outcome {
            Ok(result) => {
                if let Some(error) = result.error() {
                    tracing::warn!("[Orchestrator] {} degraded: {}", kind, error);
                }
                flow.record_step(kind, result.ok(), result.error().map(str::to_string));
            }
            Err(e) => flow.record_step(kind, false, Some(e.to_string())),
        }
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Orchestrator 构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    tools: Option<Toolbox>,
    audit: Arc<AuditLog>,
    flow_timeout: Option<Duration>,
    overrides: Vec<Arc<dyn Agent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        let flow_timeout = config.app.flow_timeout();
        Self {
            config,
            tools: None,
            audit: Arc::new(AuditLog::new()),
            flow_timeout,
            overrides: Vec::new(),
        }
    }

    /// 注入外部依赖；不设置时使用模拟实现
    pub fn with_tools(mut self, tools: Toolbox) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 追加审计输出端
    pub fn with_audit_sink(self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit.add_sink(sink);
        self
    }

    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = Some(timeout);
        self
    }

    /// 替换同类型的内置 Agent
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.overrides.push(agent);
        self
    }

    pub fn build(self) -> Orchestrator {
        let cfg = &self.config;
        let tools = self
            .tools
            .unwrap_or_else(|| Toolbox::simulated(&cfg.tools));
        let audit = self.audit;
        let state = Arc::new(StateStore::new(audit.clone()));
        let doc_breaker = Arc::new(CircuitBreaker::from_config(DOC_SERVICE, &cfg.breaker));

        let mut agents: [Arc<dyn Agent>; 5] = [
            Arc::new(RetrieverAgent::new(
                tools.documents.clone(),
                doc_breaker.clone(),
                state.clone(),
                audit.clone(),
                RetryPolicy::from(&cfg.retry.retriever),
            )),
            Arc::new(EnricherAgent::new(
                tools.llm.clone(),
                state.clone(),
                audit.clone(),
                RetryPolicy::from(&cfg.retry.enricher),
            )),
            Arc::new(PlannerAgent::new(&cfg.planner, state.clone(), audit.clone())),
            Arc::new(ExecutorAgent::new(
                tools.alerts.clone(),
                tools.orders.clone(),
                TradeSafety::from(&cfg.executor),
                state.clone(),
                audit.clone(),
                RetryPolicy::from(&cfg.retry.executor),
            )),
            Arc::new(NotifierAgent::new(
                tools.alerts.clone(),
                state.clone(),
                audit.clone(),
                RetryPolicy::from(&cfg.retry.notifier),
            )),
        ];
        for agent in self.overrides {
            let slot = agent.kind() as usize;
            agents[slot] = agent;
        }

        Orchestrator {
            state,
            audit,
            metrics: Metrics::new(),
            doc_breaker,
            agents,
            flow_timeout: self.flow_timeout,
            last_end_checkpoint: Mutex::new(None),
        }
    }
}

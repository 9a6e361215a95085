//! 单次 flow 的生命周期
//!
//! started -> retrieving -> enriching -> planning -> executing -> notifying -> completed，
//! 任一非终态都可以进入 failed。Flow 只由创建它的 Orchestrator 修改，返回结果后丢弃。

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::agents::AgentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPhase {
    Started,
    Retrieving,
    Enriching,
    Planning,
    Executing,
    Notifying,
    Completed,
    Failed,
}

impl FlowPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowPhase::Completed | FlowPhase::Failed)
    }

    /// 正常路径上的下一个阶段
    pub fn next(&self) -> Option<FlowPhase> {
        match self {
            FlowPhase::Started => Some(FlowPhase::Retrieving),
            FlowPhase::Retrieving => Some(FlowPhase::Enriching),
            FlowPhase::Enriching => Some(FlowPhase::Planning),
            FlowPhase::Planning => Some(FlowPhase::Executing),
            FlowPhase::Executing => Some(FlowPhase::Notifying),
            FlowPhase::Notifying => Some(FlowPhase::Completed),
            FlowPhase::Completed | FlowPhase::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: FlowPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == FlowPhase::Failed || self.next() == Some(to)
    }

    /// 运行某个 Agent 时所处的阶段
    pub fn running(agent: AgentKind) -> FlowPhase {
        match agent {
            AgentKind::Retriever => FlowPhase::Retrieving,
            AgentKind::Enricher => FlowPhase::Enriching,
            AgentKind::Planner => FlowPhase::Planning,
            AgentKind::Executor => FlowPhase::Executing,
            AgentKind::Notifier => FlowPhase::Notifying,
        }
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowPhase::Started => "started",
            FlowPhase::Retrieving => "retrieving",
            FlowPhase::Enriching => "enriching",
            FlowPhase::Planning => "planning",
            FlowPhase::Executing => "executing",
            FlowPhase::Notifying => "notifying",
            FlowPhase::Completed => "completed",
            FlowPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 单个 Agent 步骤的结果摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub agent: AgentKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Completed,
    Failed,
}

/// 返回给调用方的 flow 结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowResult {
    pub flow_id: String,
    pub status: FlowStatus,
    /// 执行结果；失败或执行降级时为 null
    pub execution: Value,
    /// 失败原因，仅 failed 时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub steps: Vec<StepOutcome>,
}

impl FlowResult {
    pub fn is_completed(&self) -> bool {
        self.status == FlowStatus::Completed
    }

    /// 某个 Agent 的步骤结果
    pub fn step(&self, agent: AgentKind) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.agent == agent)
    }
}

#[derive(Debug)]
pub struct Flow {
    id: String,
    query: String,
    idempotency_key: Option<String>,
    phase: FlowPhase,
    steps: Vec<StepOutcome>,
}

impl Flow {
    /// id 取 v4 UUID 的前 8 个十六进制字符
    pub fn new(query: impl Into<String>, idempotency_key: Option<String>) -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            query: query.into(),
            idempotency_key,
            phase: FlowPhase::Started,
            steps: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// 进入下一阶段；非法迁移只记 warn，不改变阶段
    pub fn enter(&mut self, to: FlowPhase) -> bool {
        if !self.phase.can_transition_to(to) {
            tracing::warn!(
                "[Flow:{}] illegal phase transition {} -> {}",
                self.id,
                self.phase,
                to
            );
            return false;
        }
        tracing::debug!("[Flow:{}] {} -> {}", self.id, self.phase, to);
        self.phase = to;
        true
    }

    pub fn record_step(&mut self, agent: AgentKind, ok: bool, error: Option<String>) {
        self.steps.push(StepOutcome { agent, ok, error });
    }

    pub fn complete(mut self, execution: Value) -> FlowResult {
        self.enter(FlowPhase::Completed);
        FlowResult {
            flow_id: self.id,
            status: FlowStatus::Completed,
            execution,
            reason: None,
            steps: self.steps,
        }
    }

    pub fn fail(mut self, reason: impl Into<String>) -> FlowResult {
        self.enter(FlowPhase::Failed);
        FlowResult {
            flow_id: self.id,
            status: FlowStatus::Failed,
            execution: Value::Null,
            reason: Some(reason.into()),
            steps: self.steps,
        }
    }
}

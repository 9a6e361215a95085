//! Planner：对摘要做关键词匹配，得出执行计划（纯决策，无 I/O）

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agents::{payload_of, str_field, truncate_chars, Agent, AgentKind, AgentResult, Payload};
use crate::config::PlannerSection;
use crate::core::{AgentError, StateStore};
use crate::observability::{AuditEvent, AuditLog};

pub const LAST_PLAN_KEY: &str = "last_plan";

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Inform,
    Escalate,
    #[serde(alias = "trade")]
    RecommendTrade,
    NoAction,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Inform => "inform",
            PlanAction::Escalate => "escalate",
            PlanAction::RecommendTrade => "recommend_trade",
            PlanAction::NoAction => "no_action",
        }
    }

    /// 按名字解析，"trade" 是 recommend_trade 的别名；未知名字返回 None
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "inform" => Some(PlanAction::Inform),
            "escalate" => Some(PlanAction::Escalate),
            "recommend_trade" | "trade" => Some(PlanAction::RecommendTrade),
            "no_action" => Some(PlanAction::NoAction),
            _ => None,
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计划：动作 + 摘要片段（前 200 字符）+ 命中的关键词
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "decision")]
    pub action: PlanAction,
    pub summary_snippet: String,
    #[serde(default)]
    pub matched_keyword: Option<String>,
}

impl Plan {
    pub fn to_value(&self) -> Value {
        json!({
            "decision": self.action.as_str(),
            "summary_snippet": self.summary_snippet,
            "matched_keyword": self.matched_keyword,
        })
    }

    /// 宽松解析：decision 缺失或未知时为 None，snippet 缺失时为空串
    pub fn from_value(value: &Value) -> Option<Self> {
        let action = value
            .get("decision")
            .and_then(Value::as_str)
            .and_then(PlanAction::parse)?;
        Some(Self {
            action,
            summary_snippet: value
                .get("summary_snippet")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            matched_keyword: value
                .get("matched_keyword")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

pub struct PlannerAgent {
    escalation_keywords: Vec<String>,
    opportunity_keywords: Vec<String>,
    state: Arc<StateStore>,
    audit: Arc<AuditLog>,
}

impl PlannerAgent {
    pub fn new(section: &PlannerSection, state: Arc<StateStore>, audit: Arc<AuditLog>) -> Self {
        let lower = |words: &[String]| -> Vec<String> {
            words.iter().map(|w| w.to_lowercase()).collect()
        };
        Self {
            escalation_keywords: lower(&section.escalation_keywords),
            opportunity_keywords: lower(&section.opportunity_keywords),
            state,
            audit,
        }
    }

    /// 升级关键词优先，其次机会关键词，否则 inform
    pub fn decide(&self, summary: &str) -> Plan {
        let haystack = summary.to_lowercase();
        let find = |words: &[String]| words.iter().find(|w| haystack.contains(w.as_str())).cloned();

        let (action, matched_keyword) = if let Some(word) = find(&self.escalation_keywords) {
            (PlanAction::Escalate, Some(word))
        } else if let Some(word) = find(&self.opportunity_keywords) {
            (PlanAction::RecommendTrade, Some(word))
        } else {
            (PlanAction::Inform, None)
        };

        Plan {
            action,
            summary_snippet: truncate_chars(summary, SNIPPET_CHARS),
            matched_keyword,
        }
    }
}

#[async_trait]
impl Agent for PlannerAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Planner
    }

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError> {
        let summary = str_field(payload, "summary").unwrap_or_default();
        let plan = self.decide(summary);
        let plan_value = plan.to_value();

        self.audit.record(
            AuditEvent::PlannerDecision,
            json!({ "decision": plan.action.as_str(), "matched_keyword": plan.matched_keyword }),
        );
        self.state.set(LAST_PLAN_KEY, plan_value.clone());
        Ok(AgentResult::success(payload_of(json!({ "plan": plan_value }))))
    }
}

//! 流水线上的五个 Agent：Retriever -> Enricher -> Planner -> Executor -> Notifier
//!
//! 统一契约 `run(payload) -> Result<AgentResult, AgentError>`：
//! 预期内的失败（依赖不可用、重试耗尽、没有文档）都降级为 `ok = false` 的 AgentResult，
//! 并且 data 里总有可用的兜底值；只有意外故障才返回 Err，由 Orchestrator 统一兜住。

pub mod enricher;
pub mod executor;
pub mod notifier;
pub mod planner;
pub mod retriever;

pub use enricher::EnricherAgent;
pub use executor::{ExecutorAgent, TradeSafety};
pub use notifier::NotifierAgent;
pub use planner::{Plan, PlanAction, PlannerAgent};
pub use retriever::RetrieverAgent;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::AgentError;

/// Agent 的输入 / 输出数据：字段名 -> JSON 值
pub type Payload = Map<String, Value>;

/// 固定的 Agent 集合（流水线形状不变，不需要插件式注册）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Retriever,
    Enricher,
    Planner,
    Executor,
    Notifier,
}

impl AgentKind {
    /// 流水线顺序
    pub const PIPELINE: [AgentKind; 5] = [
        AgentKind::Retriever,
        AgentKind::Enricher,
        AgentKind::Planner,
        AgentKind::Executor,
        AgentKind::Notifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Retriever => "retriever",
            AgentKind::Enricher => "enricher",
            AgentKind::Planner => "planner",
            AgentKind::Executor => "executor",
            AgentKind::Notifier => "notifier",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 所有 Agent 的统一返回值
///
/// 不变式：`ok == false` 时 error 非空；data 永远存在（可能是降级值）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    ok: bool,
    data: Payload,
    error: Option<String>,
}

impl AgentResult {
    pub fn success(data: Payload) -> Self {
        Self {
            ok: true,
            data,
            error: None,
        }
    }

    /// 降级结果：带兜底 data 与错误描述（空描述替换为 "unknown_error"）
    pub fn degraded(data: Payload, error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "unknown_error".to_string()
        } else {
            error
        };
        Self {
            ok: false,
            data,
            error: Some(error),
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_data(self) -> Payload {
        self.data
    }
}

/// Agent 能力接口
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(&self, payload: &Payload) -> Result<AgentResult, AgentError>;
}

/// 把 JSON 对象字面量转成 Payload；非对象时返回空 Payload
pub(crate) fn payload_of(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// 读取字符串字段，缺失或类型不符时为 None
pub(crate) fn str_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// 读取字符串数组字段，非字符串元素被忽略
pub(crate) fn str_list_field(payload: &Payload, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// 按字符截断（不会切断 UTF-8）
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_degraded_always_carries_error() {
        let result = AgentResult::degraded(Payload::new(), "  ");
        assert!(!result.ok());
        assert_eq!(result.error(), Some("unknown_error"));

        let result = AgentResult::degraded(payload_of(json!({"docs": []})), "no_docs");
        assert_eq!(result.error(), Some("no_docs"));
        assert_eq!(result.data()["docs"], json!([]));
    }

    #[test]
    fn test_success_has_no_error() {
        let result = AgentResult::success(payload_of(json!({"summary": "s"})));
        assert!(result.ok());
        assert_eq!(result.error(), None);
    }

    #[test]
    fn test_field_helpers() {
        let payload = payload_of(json!({"query": "q", "docs": ["a", 1, "b"]}));
        assert_eq!(str_field(&payload, "query"), Some("q"));
        assert_eq!(str_field(&payload, "docs"), None);
        assert_eq!(str_list_field(&payload, "docs"), vec!["a", "b"]);
        assert!(str_list_field(&payload, "missing").is_empty());
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_kind_names_follow_pipeline() {
        let names: Vec<&str> = AgentKind::PIPELINE.iter().map(AgentKind::as_str).collect();
        assert_eq!(
            names,
            vec!["retriever", "enricher", "planner", "executor", "notifier"]
        );
    }
}

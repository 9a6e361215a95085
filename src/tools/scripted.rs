//! 确定性的外部依赖替身
//!
//! 每个替身按 Script 决定每次调用的结果，并记录调用次数，便于断言“副作用最多发生一次”之类的性质。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::ToolError;
use crate::tools::{
    AlertChannel, AlertPriority, DocumentSource, LlmClient, OrderConfirmation, OrderGateway,
    OrderRequest,
};

/// 调用结果脚本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    AlwaysOk,
    /// 每次都返回可重试错误
    AlwaysFail,
    /// 前 n 次返回可重试错误，之后成功
    FailTimes(u32),
    /// 每次都返回 ToolError::Fatal
    Fatal,
}

/// 调用计数 + 按脚本判定本次结果
#[derive(Debug)]
struct Counter {
    script: Script,
    calls: AtomicU32,
}

impl Counter {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicU32::new(0),
        }
    }

    /// 记一次调用，返回本次应得的错误（None 表示成功）
    fn next(&self, transient: impl FnOnce() -> ToolError) -> Option<ToolError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script {
            Script::AlwaysOk => None,
            Script::AlwaysFail => Some(transient()),
            Script::FailTimes(times) if n <= times => Some(transient()),
            Script::FailTimes(_) => None,
            Script::Fatal => Some(ToolError::Fatal("scripted fatal fault".to_string())),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// 成功时返回 `Doc(<query>)#1`、`Doc(<query>)#2`，或固定的文档列表
pub struct ScriptedDocuments {
    counter: Counter,
    docs: Option<Vec<String>>,
}

impl ScriptedDocuments {
    pub fn new(script: Script) -> Self {
        Self {
            counter: Counter::new(script),
            docs: None,
        }
    }

    /// 固定返回 docs（可以为空）
    pub fn with_docs(script: Script, docs: Vec<String>) -> Self {
        Self {
            counter: Counter::new(script),
            docs: Some(docs),
        }
    }

    pub fn calls(&self) -> u32 {
        self.counter.calls()
    }
}

#[async_trait]
impl DocumentSource for ScriptedDocuments {
    async fn fetch_documents(&self, query: &str) -> Result<Vec<String>, ToolError> {
        if let Some(err) = self
            .counter
            .next(|| ToolError::Connectivity(format!("cannot fetch '{query}'")))
        {
            return Err(err);
        }
        tokio::task::yield_now().await;
        Ok(self
            .docs
            .clone()
            .unwrap_or_else(|| (1..=2).map(|i| format!("Doc({query})#{i}")).collect()))
    }
}

/// 成功时原样回显 prompt（或固定回复）
pub struct ScriptedLlm {
    counter: Counter,
    reply: Option<String>,
}

impl ScriptedLlm {
    pub fn new(script: Script) -> Self {
        Self {
            counter: Counter::new(script),
            reply: None,
        }
    }

    pub fn replying(script: Script, reply: impl Into<String>) -> Self {
        Self {
            counter: Counter::new(script),
            reply: Some(reply.into()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.counter.calls()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String, ToolError> {
        if let Some(err) = self
            .counter
            .next(|| ToolError::Timeout("scripted LLM timeout".to_string()))
        {
            return Err(err);
        }
        tokio::task::yield_now().await;
        Ok(self.reply.clone().unwrap_or_else(|| prompt.to_string()))
    }
}

/// 记录每条成功送达的消息
pub struct ScriptedAlerts {
    counter: Counter,
    delivered: Mutex<Vec<(String, AlertPriority)>>,
}

impl ScriptedAlerts {
    pub fn new(script: Script) -> Self {
        Self {
            counter: Counter::new(script),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.counter.calls()
    }

    pub fn delivered(&self) -> Vec<(String, AlertPriority)> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AlertChannel for ScriptedAlerts {
    async fn send_alert(&self, message: &str, priority: AlertPriority) -> Result<bool, ToolError> {
        if let Some(err) = self
            .counter
            .next(|| ToolError::Service("scripted alert failure".to_string()))
        {
            return Err(err);
        }
        tokio::task::yield_now().await;
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message.to_string(), priority));
        Ok(true)
    }
}

/// 按调用序号生成 ORD-NNNNN
pub struct ScriptedOrders {
    counter: Counter,
    placed: Mutex<Vec<OrderRequest>>,
}

impl ScriptedOrders {
    pub fn new(script: Script) -> Self {
        Self {
            counter: Counter::new(script),
            placed: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> u32 {
        self.counter.calls()
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl OrderGateway for ScriptedOrders {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderConfirmation, ToolError> {
        if let Some(err) = self
            .counter
            .next(|| ToolError::Service("order failed: API error".to_string()))
        {
            return Err(err);
        }
        tokio::task::yield_now().await;
        let mut placed = self.placed.lock().unwrap_or_else(PoisonError::into_inner);
        placed.push(order.clone());
        Ok(OrderConfirmation {
            order_id: format!("ORD-{:05}", 10000 + placed.len()),
            status: "filled".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_times_then_succeeds() {
        let docs = ScriptedDocuments::new(Script::FailTimes(2));
        assert!(docs.fetch_documents("q").await.is_err());
        assert!(docs.fetch_documents("q").await.is_err());
        assert_eq!(
            docs.fetch_documents("q").await.unwrap(),
            vec!["Doc(q)#1", "Doc(q)#2"]
        );
        assert_eq!(docs.calls(), 3);
    }

    #[tokio::test]
    async fn test_fatal_script_is_not_retryable() {
        use crate::core::RetryableError;

        let llm = ScriptedLlm::new(Script::Fatal);
        let err = llm.complete("p").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_alerts_record_delivered_messages() {
        let alerts = ScriptedAlerts::new(Script::AlwaysOk);
        alerts.send_alert("hello", AlertPriority::High).await.unwrap();
        assert_eq!(
            alerts.delivered(),
            vec![("hello".to_string(), AlertPriority::High)]
        );
    }

    #[tokio::test]
    async fn test_orders_get_sequential_ids() {
        let orders = ScriptedOrders::new(Script::AlwaysOk);
        let request = OrderRequest {
            quantity: 1,
            note: "test".into(),
            idempotency_key: "k".into(),
        };
        assert_eq!(orders.place_order(&request).await.unwrap().order_id, "ORD-10001");
        assert_eq!(orders.place_order(&request).await.unwrap().order_id, "ORD-10002");
        assert_eq!(orders.placed().len(), 2);
    }
}

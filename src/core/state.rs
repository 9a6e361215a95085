//! 工作记忆：键值存储 + 命名检查点
//!
//! 同一个 Orchestrator 的所有 flow 共享一份 StateStore。内部互斥锁只在同步方法里持有，
//! 不会跨越 await，因此并发 flow 只会在挂起点之间交错。
//!
//! 命名空间约定：`exec_done_<idempotency_key>` 与检查点 `start_<flow_id>` 按 flow / 幂等键隔离；
//! `cached_docs`、`last_summary` 等共享键不隔离，并发 flow 之间会互相覆盖。
//!
//! rollback 整体替换当前内容；rollback_keeping 额外保留快照之后新增的、调用方指定的键。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};

use crate::observability::{AuditEvent, AuditLog};

#[derive(Debug, Default)]
struct StoreInner {
    live: HashMap<String, Value>,
    checkpoints: HashMap<String, HashMap<String, Value>>,
}

pub struct StateStore {
    inner: Mutex<StoreInner>,
    audit: Arc<AuditLog>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(Arc::new(AuditLog::new()))
    }
}

impl StateStore {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            audit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 无条件覆盖
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().live.insert(key.into(), value);
    }

    /// 仅当 key 不存在时写入，返回是否写入
    pub fn set_if_absent(&self, key: impl Into<String>, value: Value) -> bool {
        let mut inner = self.lock();
        let key = key.into();
        if inner.live.contains_key(&key) {
            return false;
        }
        inner.live.insert(key, value);
        true
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().live.get(key).cloned()
    }

    /// 不存在时返回 default，从不失败
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().live.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().live.remove(key)
    }

    /// 当前所有键（排序后）
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().live.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 当前内容的拷贝
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.lock().live.clone()
    }

    pub fn has_checkpoint(&self, name: &str) -> bool {
        self.lock().checkpoints.contains_key(name)
    }

    /// 以 name 保存当前内容的快照，同名检查点被覆盖
    pub fn checkpoint(&self, name: &str) {
        let keys = {
            let mut inner = self.lock();
            let snapshot = inner.live.clone();
            let mut keys: Vec<String> = snapshot.keys().cloned().collect();
            keys.sort();
            inner.checkpoints.insert(name.to_string(), snapshot);
            keys
        };
        tracing::info!("[State] checkpoint '{}' created", name);
        self.audit.record(
            AuditEvent::CheckpointCreated,
            json!({ "name": name, "state_snapshot": keys }),
        );
    }

    /// 删除检查点，返回是否存在
    pub fn drop_checkpoint(&self, name: &str) -> bool {
        self.lock().checkpoints.remove(name).is_some()
    }

    /// 当前保留的检查点名（排序后）
    pub fn checkpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().checkpoints.keys().cloned().collect();
        names.sort();
        names
    }

    /// 用快照整体替换当前内容（不合并）；检查点不存在时只打 warn，返回 false
    pub fn rollback(&self, name: &str) -> bool {
        self.rollback_keeping(name, |_| false)
    }

    /// 同 rollback，但快照之后新增、且 keep(key) 为 true 的键保留当前值
    pub fn rollback_keeping<F>(&self, name: &str, keep: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        let kept = {
            let mut inner = self.lock();
            let snapshot = inner.checkpoints.get(name).cloned();
            match snapshot {
                Some(mut snapshot) => {
                    let mut kept = Vec::new();
                    for (key, value) in inner.live.drain() {
                        if !snapshot.contains_key(&key) && keep(&key) {
                            kept.push(key.clone());
                            snapshot.insert(key, value);
                        }
                    }
                    inner.live = snapshot;
                    kept.sort();
                    Some(kept)
                }
                None => None,
            }
        };

        match kept {
            Some(kept) => {
                tracing::info!("[State] rolled back to checkpoint '{}'", name);
                self.audit.record(
                    AuditEvent::CheckpointRollback,
                    json!({ "name": name, "kept": kept }),
                );
                true
            }
            None => {
                tracing::warn!("[State] no checkpoint '{}' to rollback", name);
                false
            }
        }
    }
}

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__BREAKER__FAIL_THRESHOLD=6`）。
//! 所有字段都有默认值，与缺省配置文件一致，缺文件也能跑。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub retry: RetrySections,
    pub breaker: BreakerSection,
    pub planner: PlannerSection,
    pub executor: ExecutorSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、单个 flow 超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单个 flow 的整体超时（秒）；未设置时只靠有界重试收敛
    pub flow_timeout_secs: Option<u64>,
}

impl AppSection {
    pub fn flow_timeout(&self) -> Option<Duration> {
        self.flow_timeout_secs.map(Duration::from_secs)
    }
}

/// [retry.*] 段：每个 Agent 各自的重试参数
///
/// 未写出的字段取该 Agent 自己的默认值（retriever 默认重试 3 次，enricher 初始退避 300ms）。
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawRetrySections")]
pub struct RetrySections {
    pub retriever: RetrySection,
    pub enricher: RetrySection,
    pub executor: RetrySection,
    pub notifier: RetrySection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRetrySections {
    retriever: RetryOverride,
    enricher: RetryOverride,
    executor: RetryOverride,
    notifier: RetryOverride,
}

impl From<RawRetrySections> for RetrySections {
    fn from(raw: RawRetrySections) -> Self {
        Self {
            retriever: raw.retriever.over(default_retriever_retry()),
            enricher: raw.enricher.over(default_enricher_retry()),
            executor: raw.executor.over(RetrySection::default()),
            notifier: raw.notifier.over(RetrySection::default()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RetryOverride {
    retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

impl RetryOverride {
    fn over(self, base: RetrySection) -> RetrySection {
        RetrySection {
            retries: self.retries.unwrap_or(base.retries),
            initial_backoff_ms: self.initial_backoff_ms.unwrap_or(base.initial_backoff_ms),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(base.max_backoff_ms),
        }
    }
}

impl Default for RetrySections {
    fn default() -> Self {
        Self {
            retriever: default_retriever_retry(),
            enricher: default_enricher_retry(),
            executor: RetrySection::default(),
            notifier: RetrySection::default(),
        }
    }
}

fn default_retriever_retry() -> RetrySection {
    RetrySection {
        retries: 3,
        ..RetrySection::default()
    }
}

fn default_enricher_retry() -> RetrySection {
    RetrySection {
        initial_backoff_ms: 300,
        ..RetrySection::default()
    }
}

#[derive(Debug, Clone)]
pub struct RetrySection {
    /// 首次失败后的最大重试次数（总调用次数 = retries + 1）
    pub retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

/// [breaker] 段：文档服务熔断器
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

fn default_fail_threshold() -> u32 {
    4
}

fn default_recovery_timeout_secs() -> u64 {
    20
}

/// [planner] 段：关键词集合，升级关键词优先于机会关键词
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_escalation_keywords")]
    pub escalation_keywords: Vec<String>,
    #[serde(default = "default_opportunity_keywords")]
    pub opportunity_keywords: Vec<String>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            escalation_keywords: default_escalation_keywords(),
            opportunity_keywords: default_opportunity_keywords(),
        }
    }
}

fn default_escalation_keywords() -> Vec<String> {
    vec!["alert".into(), "fraud".into(), "risk".into(), "urgent".into()]
}

fn default_opportunity_keywords() -> Vec<String> {
    vec!["opportunity".into(), "buy".into(), "recommend".into()]
}

/// [executor] 段：交易分支的安全闸
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_trading_enabled")]
    pub trading_enabled: bool,
    #[serde(default = "default_order_quantity")]
    pub order_quantity: u32,
    #[serde(default = "default_max_order_quantity")]
    pub max_order_quantity: u32,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            trading_enabled: default_trading_enabled(),
            order_quantity: default_order_quantity(),
            max_order_quantity: default_max_order_quantity(),
        }
    }
}

fn default_trading_enabled() -> bool {
    true
}

fn default_order_quantity() -> u32 {
    1
}

fn default_max_order_quantity() -> u32 {
    10
}

/// [tools.*] 段：模拟外部依赖的延迟与失败率
///
/// 只写出部分字段时，其余字段取该工具自己的默认画像，而不是 0。
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawToolsSection")]
pub struct ToolsSection {
    pub fetch: FaultSection,
    pub llm: FaultSection,
    pub alert: FaultSection,
    pub order: FaultSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawToolsSection {
    fetch: FaultOverride,
    llm: FaultOverride,
    alert: FaultOverride,
    order: FaultOverride,
}

impl From<RawToolsSection> for ToolsSection {
    fn from(raw: RawToolsSection) -> Self {
        Self {
            fetch: raw.fetch.over(default_fetch_profile()),
            llm: raw.llm.over(default_llm_profile()),
            alert: raw.alert.over(default_alert_profile()),
            order: raw.order.over(default_order_profile()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FaultOverride {
    failure_rate: Option<f64>,
    min_latency_ms: Option<u64>,
    max_latency_ms: Option<u64>,
}

impl FaultOverride {
    fn over(self, base: FaultSection) -> FaultSection {
        FaultSection {
            failure_rate: self.failure_rate.unwrap_or(base.failure_rate),
            min_latency_ms: self.min_latency_ms.unwrap_or(base.min_latency_ms),
            max_latency_ms: self.max_latency_ms.unwrap_or(base.max_latency_ms),
        }
    }
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            fetch: default_fetch_profile(),
            llm: default_llm_profile(),
            alert: default_alert_profile(),
            order: default_order_profile(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FaultSection {
    /// 单次调用失败概率（0.0 ~ 1.0）
    pub failure_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl FaultSection {
    fn new(failure_rate: f64, min_latency_ms: u64, max_latency_ms: u64) -> Self {
        Self {
            failure_rate,
            min_latency_ms,
            max_latency_ms,
        }
    }
}

fn default_fetch_profile() -> FaultSection {
    FaultSection::new(0.07, 50, 300)
}

fn default_llm_profile() -> FaultSection {
    FaultSection::new(0.05, 100, 600)
}

fn default_alert_profile() -> FaultSection {
    FaultSection::new(0.03, 20, 100)
}

fn default_order_profile() -> FaultSection {
    FaultSection::new(0.05, 200, 600)
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.retriever.retries, 3);
        assert_eq!(cfg.retry.enricher.retries, 2);
        assert_eq!(cfg.retry.enricher.initial_backoff_ms, 300);
        assert_eq!(cfg.retry.executor.max_backoff_ms, 5000);
        assert_eq!(cfg.breaker.fail_threshold, 4);
        assert_eq!(cfg.breaker.recovery_timeout_secs, 20);
        assert!(cfg.planner.escalation_keywords.contains(&"fraud".to_string()));
        assert!(cfg.executor.trading_enabled);
        assert!(cfg.app.flow_timeout().is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[breaker]\nfail_threshold = 9\n\n[executor]\ntrading_enabled = false\n\n[app]\nflow_timeout_secs = 7"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).expect("config loads");
        assert_eq!(cfg.breaker.fail_threshold, 9);
        assert!(!cfg.executor.trading_enabled);
        assert_eq!(cfg.app.flow_timeout(), Some(Duration::from_secs(7)));
        // 未覆盖的字段保留默认值
        assert_eq!(cfg.breaker.recovery_timeout_secs, 20);
    }

    fn from_toml(toml: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_partial_tool_profile_keeps_tool_defaults() {
        let cfg = from_toml("[tools.fetch]\nfailure_rate = 0.5");

        assert_eq!(cfg.tools.fetch.failure_rate, 0.5);
        assert_eq!(cfg.tools.fetch.min_latency_ms, 50);
        assert_eq!(cfg.tools.fetch.max_latency_ms, 300);
        assert_eq!(cfg.tools.llm, default_llm_profile());
        assert_eq!(cfg.tools.order, default_order_profile());
    }

    #[test]
    fn test_partial_retry_section_keeps_agent_defaults() {
        let cfg = from_toml("[retry.retriever]\ninitial_backoff_ms = 10\n\n[retry.enricher]\nretries = 5");

        assert_eq!(cfg.retry.retriever.retries, 3);
        assert_eq!(cfg.retry.retriever.initial_backoff_ms, 10);
        assert_eq!(cfg.retry.enricher.retries, 5);
        assert_eq!(cfg.retry.enricher.initial_backoff_ms, 300);
        assert_eq!(cfg.retry.notifier.max_backoff_ms, 5000);
    }
}

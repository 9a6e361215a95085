//! Hive 演示入口
//!
//! 先串行跑三条查询，再并发跑三条带幂等键的查询，最后打印计数器与最近的审计记录。
//! 用法：`hive [config.toml]`

use std::path::PathBuf;

use anyhow::Context;
use hive::config::{load_config, AppConfig};
use hive::{FlowRequest, Orchestrator};

const QUERIES: [&str; 3] = [
    "Check for fraud alerts in payments today",
    "Summarize market signals for AAPL and TSLA",
    "Detect suspicious KYC activity in recent onboarding",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    tracing::info!(
        "Starting {}",
        cfg.app.name.as_deref().unwrap_or("hive")
    );

    let orch = Orchestrator::new(&cfg);

    println!("\n--- Running serial flows ---");
    for query in QUERIES {
        let result = orch.run_flow(query, None).await;
        println!(
            "{}",
            serde_json::to_string(&result).context("serialize flow result")?
        );
    }

    println!("\n--- Running parallel flows ---");
    let requests: Vec<FlowRequest> = QUERIES
        .iter()
        .enumerate()
        .map(|(i, q)| FlowRequest::new(*q).with_key(format!("idp-{}", i + 1)))
        .collect();
    for result in orch.run_flows(&requests).await {
        println!(
            "{}",
            serde_json::to_string(&result).context("serialize flow result")?
        );
    }

    println!("\n--- Metrics ---");
    println!(
        "{}",
        serde_json::to_string_pretty(&orch.metrics()).context("serialize metrics")?
    );

    println!("\n--- Recent audit entries ---");
    for entry in orch.audit().tail(6) {
        println!(
            "{}",
            serde_json::to_string(&entry).context("serialize audit entry")?
        );
    }

    Ok(())
}

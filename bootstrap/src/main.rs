//! rstore-smoke - 对配置的 Redis 执行一次 set/get/delete

use std::time::Duration;

use anyhow::{Context, bail};
use rstore_bootstrap::start;
use rstore_ports::KeyValueStorage;
use tracing::info;

const SMOKE_KEY: &str = "rstore:smoke";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_dir = std::env::var("RSTORE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let runtime = start(&config_dir)
        .await
        .with_context(|| format!("failed to start with config dir {}", config_dir))?;
    let storage = &runtime.storage;

    storage
        .set(SMOKE_KEY, b"ok", Some(Duration::from_secs(30)))
        .await
        .context("set failed")?;
    match storage.get(SMOKE_KEY).await.context("get failed")? {
        Some(value) if value == b"ok" => info!(key = SMOKE_KEY, "Round-trip succeeded"),
        other => bail!("unexpected value for {}: {:?}", SMOKE_KEY, other),
    }
    storage.delete(SMOKE_KEY).await.context("delete failed")?;

    if let Some(metrics) = runtime.render_metrics() {
        println!("{}", metrics);
    }

    storage.close().await.context("close failed")?;
    Ok(())
}

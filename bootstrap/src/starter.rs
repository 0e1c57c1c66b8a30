//! 启动器
//!
//! 加载配置 → 初始化遥测 → 建立存储

use metrics_exporter_prometheus::PrometheusHandle;
use rstore_adapter_redis::RedisStorage;
use rstore_config::AppConfig;
use rstore_errors::{StorageError, StorageResult};
use tracing::info;

use crate::runtime::init_runtime;

/// 已初始化的运行时资源
pub struct Runtime {
    pub config: AppConfig,
    pub storage: RedisStorage,
    pub metrics: Option<PrometheusHandle>,
}

impl Runtime {
    /// 渲染 Prometheus 指标，未启用 metrics 时返回 `None`
    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(PrometheusHandle::render)
    }
}

/// 从配置目录启动
pub async fn start(config_dir: &str) -> StorageResult<Runtime> {
    let config = AppConfig::load(config_dir)
        .map_err(|e| StorageError::config(e.to_string()))?;
    start_with_config(config).await
}

/// 使用已加载的配置启动
pub async fn start_with_config(config: AppConfig) -> StorageResult<Runtime> {
    let metrics = init_runtime(&config)?;

    let storage = RedisStorage::connect(config.storage.clone()).await?;
    info!(
        client_cache = config.storage.client_cache.is_some(),
        sentinel = config.storage.is_sentinel(),
        "Storage connected"
    );

    Ok(Runtime {
        config,
        storage,
        metrics,
    })
}

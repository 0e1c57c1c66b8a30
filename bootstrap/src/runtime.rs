//! 运行时初始化

use metrics_exporter_prometheus::PrometheusHandle;
use rstore_config::AppConfig;
use rstore_errors::{StorageError, StorageResult};
use rstore_telemetry::init;
use tracing::info;

/// 初始化日志与指标
///
/// 返回的 handle 仅在 `telemetry.metrics = true` 时存在。
pub fn init_runtime(config: &AppConfig) -> StorageResult<Option<PrometheusHandle>> {
    let mut telemetry = config.telemetry.clone();
    telemetry.json |= config.is_production();

    let handle = init(&telemetry).map_err(|e| {
        StorageError::config(format!("Failed to install Prometheus recorder: {}", e))
    })?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        metrics = handle.is_some(),
        "Runtime initialized"
    );
    Ok(handle)
}

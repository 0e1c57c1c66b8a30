//! 存储操作指标

use std::time::Instant;

use metrics::{counter, histogram};

/// 记录一次存储操作
///
/// outcome 取值：`hit` / `miss`（get）、`ok`、`skipped`（空键或空值），
/// 失败时为 [`StorageError::kind`](rstore_errors::StorageError::kind)
pub(crate) fn record_operation(operation: &'static str, outcome: &'static str, started: Instant) {
    counter!(
        "storage_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    histogram!("storage_operation_duration_ms", "operation" => operation)
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

//! 重试机制模块
//!
//! 客户端缓存传输对只读命令的指数退避重试，以及命令错误分类

use std::future::Future;
use std::time::Duration;

use redis::{ErrorKind, RedisError};
use rstore_errors::StorageError;
use tracing::{info, warn};

/// 重试配置
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 最大尝试次数（包含首次）
    pub max_attempts: u32,
    /// 初始延迟
    pub initial_delay: Duration,
    /// 最大延迟
    pub max_delay: Duration,
    /// 退避乘数
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// 只尝试一次
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// 计算第 n 次重试的延迟
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay = (delay_ms as u64).min(self.max_delay.as_millis() as u64);
        Duration::from_millis(capped_delay)
    }
}

/// 带重试的异步操作执行器
///
/// 只有 `should_retry` 返回 true 的错误才会重试。
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Redis operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if attempt + 1 < max_attempts && should_retry(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Redis operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 判断 Redis 错误是否可重试
pub fn is_retryable(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || matches!(error.kind(), ErrorKind::TryAgain | ErrorKind::BusyLoadingError)
}

/// 连接已断开、被拒绝，或节点已降为只读副本
pub fn is_node_lost(error: &RedisError) -> bool {
    error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.kind() == ErrorKind::ReadOnly
}

/// 把命令失败映射为存储错误
pub(crate) fn command_error(operation: &str, error: RedisError) -> StorageError {
    let msg = format!("Redis {} failed: {}", operation, error);
    if is_node_lost(&error) {
        StorageError::unavailable(msg)
    } else {
        StorageError::backend(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> RetryConfig {
        RetryConfig::new(3, Duration::from_millis(1), Duration::from_millis(10))
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_millis(100), Duration::from_secs(5));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result: Result<i32, &str> =
            with_retry(&fast_config(), "test", |_| true, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let counter = AtomicU32::new(0);

        let result: Result<i32, &str> = with_retry(&fast_config(), "test", |_| true, || {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_all_failures() {
        let counter = AtomicU32::new(0);

        let result: Result<i32, &str> = with_retry(&fast_config(), "test", |_| true, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("permanent error") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let counter = AtomicU32::new(0);

        let result: Result<i32, &str> = with_retry(&fast_config(), "test", |_| false, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err("wrong type") }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_retry_runs_once() {
        let counter = AtomicU32::new(0);

        let result: Result<i32, &str> =
            with_retry(&RetryConfig::disabled(), "test", |_| true, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("timeout") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_retryable() {
        let io = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(is_retryable(&io));

        let busy = RedisError::from((ErrorKind::BusyLoadingError, "loading"));
        assert!(is_retryable(&busy));

        let wrong_type = RedisError::from((ErrorKind::TypeError, "wrong type"));
        assert!(!is_retryable(&wrong_type));
    }

    #[test]
    fn test_command_error_classification() {
        let reset = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ));
        assert!(command_error("GET", reset).is_unavailable());

        let demoted = RedisError::from((ErrorKind::ReadOnly, "You can't write against a read only replica."));
        assert!(command_error("SET", demoted).is_unavailable());

        let wrong_type = RedisError::from((ErrorKind::TypeError, "wrong type"));
        assert!(matches!(
            command_error("GET", wrong_type),
            StorageError::Backend(msg) if msg.starts_with("Redis GET failed")
        ));
    }
}

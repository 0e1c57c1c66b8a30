//! 客户端缓存传输
//!
//! 基于 RESP3 的 server-assisted client-side caching：GET 结果缓存在每条多路复用连接本地，
//! 由服务端推送失效通知。缓存 TTL 属于每个实例，不同实例之间互不影响。

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::caching::{CacheConfig, CacheMode};
use redis::{AsyncConnectionConfig, Client, ErrorKind, RedisError, RedisResult};
use rstore_config::ClientCacheConfig;
use rstore_errors::{StorageError, StorageResult};
use tracing::{debug, info};

use crate::connection::set_client_name;
use crate::retry::{RetryConfig, command_error, is_retryable, with_retry};
use crate::transport::{Transport, set_cmd};

/// 每条连接的本地缓存参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCache {
    pub size: NonZeroUsize,
    pub ttl: Duration,
}

impl LocalCache {
    /// `disable_cache` 时返回 `None`
    pub fn from_config(cache: &ClientCacheConfig) -> StorageResult<Option<Self>> {
        if cache.disable_cache {
            return Ok(None);
        }
        let size = NonZeroUsize::new(cache.cache_size_each_conn)
            .ok_or_else(|| StorageError::config("cache_size_each_conn must be positive"))?;
        Ok(Some(Self {
            size,
            ttl: cache.cache_ttl(),
        }))
    }
}

fn retry_policy(cache: &ClientCacheConfig) -> RetryConfig {
    if cache.disable_retry {
        RetryConfig::disabled()
    } else {
        RetryConfig::default()
    }
}

/// 客户端缓存 Redis 客户端
pub struct CachedClient {
    connections: RwLock<Vec<MultiplexedConnection>>,
    round_robin_index: AtomicUsize,
    closed: AtomicBool,
    cache_ttl: Duration,
    local_cache: Option<LocalCache>,
    retry: RetryConfig,
}

impl CachedClient {
    /// 建立 `2^pipeline_multiplex` 条多路复用连接
    pub async fn connect(
        client: Client,
        cache: &ClientCacheConfig,
        client_name: Option<&str>,
        connection_timeout: Option<Duration>,
        response_timeout: Option<Duration>,
    ) -> StorageResult<Self> {
        let local_cache = LocalCache::from_config(cache)?;
        let count = cache.connection_count();

        let mut connections = Vec::with_capacity(count);
        for i in 0..count {
            let config = connection_config(local_cache, connection_timeout, response_timeout);
            let mut conn = client
                .get_multiplexed_async_connection_with_config(&config)
                .await
                .map_err(|e| {
                    StorageError::connection(format!(
                        "Failed to create Redis connection {}: {}",
                        i, e
                    ))
                })?;
            set_client_name(&mut conn, client_name).await?;
            connections.push(conn);
        }

        info!(
            connections = count,
            cache_enabled = local_cache.is_some(),
            cache_ttl_secs = cache.cache_ttl_secs,
            cache_size_each_conn = cache.cache_size_each_conn,
            retry_enabled = !cache.disable_retry,
            "Redis client-side caching client created"
        );

        Self::from_connections(connections, cache)
    }

    /// 用已建立的连接组装客户端
    pub fn from_connections(
        connections: Vec<MultiplexedConnection>,
        cache: &ClientCacheConfig,
    ) -> StorageResult<Self> {
        Ok(Self {
            connections: RwLock::new(connections),
            round_robin_index: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            cache_ttl: cache.cache_ttl(),
            local_cache: LocalCache::from_config(cache)?,
            retry: retry_policy(cache),
        })
    }

    /// 本实例的本地缓存 TTL
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// 本地缓存参数，关闭缓存时为 `None`
    pub fn local_cache(&self) -> Option<LocalCache> {
        self.local_cache
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 轮询取一条连接（用于特殊操作），关闭后返回 `None`
    pub fn connection(&self) -> Option<MultiplexedConnection> {
        let connections = self.connections.read();
        if connections.is_empty() {
            return None;
        }
        let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed) % connections.len();
        Some(connections[index].clone())
    }

    async fn query_once<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> RedisResult<T> {
        let mut conn = self
            .connection()
            .ok_or_else(|| RedisError::from((ErrorKind::ClientError, "connections released")))?;
        cmd.query_async::<T>(&mut conn).await
    }

    fn map_err(&self, operation: &str, e: RedisError) -> StorageError {
        if self.is_closed() {
            StorageError::Closed
        } else {
            command_error(operation, e)
        }
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        operation: &str,
        cmd: &redis::Cmd,
    ) -> StorageResult<T> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        self.query_once(cmd)
            .await
            .map_err(|e| self.map_err(operation, e))
    }
}

fn connection_config(
    local_cache: Option<LocalCache>,
    connection_timeout: Option<Duration>,
    response_timeout: Option<Duration>,
) -> AsyncConnectionConfig {
    let mut config = AsyncConnectionConfig::new();
    if let Some(timeout) = connection_timeout {
        config = config.set_connection_timeout(timeout);
    }
    if let Some(timeout) = response_timeout {
        config = config.set_response_timeout(timeout);
    }
    if let Some(local) = local_cache {
        config = config.set_cache_config(
            CacheConfig::new()
                .set_mode(CacheMode::All)
                .set_size(local.size)
                .set_default_client_ttl(local.ttl),
        );
    }
    config
}

#[async_trait]
impl Transport for CachedClient {
    async fn ping(&self) -> StorageResult<()> {
        self.query::<String>("PING", &redis::cmd("PING")).await?;
        Ok(())
    }

    /// GET 是只读命令，传输层错误按重试配置重试
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        with_retry(&self.retry, "GET", is_retryable, || self.query_once(&cmd))
            .await
            .map_err(|e| self.map_err("GET", e))
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()> {
        self.query("SET", &set_cmd(key, value, expiry)?).await
    }

    async fn del(&self, key: &str) -> StorageResult<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.query("DEL", &cmd).await
    }

    async fn flush_db(&self) -> StorageResult<()> {
        self.query("FLUSHDB", &redis::cmd("FLUSHDB")).await
    }

    async fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let released = {
            let mut connections = self.connections.write();
            std::mem::take(&mut *connections).len()
        };
        debug!(connections = released, "Redis client-side caching client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_config(ttl_secs: u64) -> ClientCacheConfig {
        ClientCacheConfig {
            cache_ttl_secs: ttl_secs,
            cache_size_each_conn: 128,
            ..Default::default()
        }
    }

    #[test]
    fn test_local_cache_uses_instance_ttl() {
        let local = LocalCache::from_config(&cache_config(5)).unwrap();
        assert_eq!(
            local,
            Some(LocalCache {
                size: NonZeroUsize::new(128).unwrap(),
                ttl: Duration::from_secs(5),
            })
        );
    }

    #[test]
    fn test_disable_cache_has_no_local_cache() {
        let cache = ClientCacheConfig {
            disable_cache: true,
            cache_size_each_conn: 0,
            ..Default::default()
        };
        assert_eq!(LocalCache::from_config(&cache).unwrap(), None);
    }

    #[test]
    fn test_zero_cache_size_is_config_error() {
        let cache = ClientCacheConfig {
            cache_size_each_conn: 0,
            ..Default::default()
        };
        assert!(matches!(
            LocalCache::from_config(&cache),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_retry_policy_follows_disable_retry() {
        assert_eq!(retry_policy(&ClientCacheConfig::default()), RetryConfig::default());

        let disabled = ClientCacheConfig {
            disable_retry: true,
            ..Default::default()
        };
        assert_eq!(retry_policy(&disabled), RetryConfig::disabled());
        assert_eq!(retry_policy(&disabled).max_attempts, 1);
    }

    #[test]
    fn test_instances_keep_their_own_ttl() {
        let short = CachedClient::from_connections(Vec::new(), &cache_config(1)).unwrap();
        let long = CachedClient::from_connections(Vec::new(), &cache_config(30)).unwrap();

        assert_eq!(short.cache_ttl(), Duration::from_secs(1));
        assert_eq!(long.cache_ttl(), Duration::from_secs(30));
        assert_eq!(short.local_cache().map(|c| c.ttl), Some(Duration::from_secs(1)));
        assert_eq!(long.local_cache().map(|c| c.ttl), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_client_reflects_toggles() {
        let cache = ClientCacheConfig {
            disable_cache: true,
            disable_retry: true,
            ..Default::default()
        };
        let client = CachedClient::from_connections(Vec::new(), &cache).unwrap();
        assert!(client.local_cache().is_none());
        assert_eq!(client.retry_config(), &RetryConfig::disabled());
        assert!(client.connection().is_none());
    }

    #[tokio::test]
    async fn test_close_then_operate() {
        let client = CachedClient::from_connections(Vec::new(), &cache_config(1)).unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();

        assert!(client.is_closed());
        assert!(matches!(client.get("k").await, Err(StorageError::Closed)));
        assert!(matches!(
            client.set("k", b"v", None).await,
            Err(StorageError::Closed)
        ));
        assert!(matches!(client.ping().await, Err(StorageError::Closed)));
    }

    #[tokio::test]
    async fn test_no_connection_is_backend_error() {
        let client = CachedClient::from_connections(Vec::new(), &cache_config(1)).unwrap();
        assert!(matches!(client.del("k").await, Err(StorageError::Backend(_))));
    }
}

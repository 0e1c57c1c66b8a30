//! 传输抽象
//!
//! 存储适配器只依赖 [`Transport`]，直连还是哨兵、连接池还是客户端缓存由配置决定。

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use rstore_errors::{StorageError, StorageResult};
use tracing::warn;

use crate::cached::CachedClient;
use crate::connection::{direct_client, discover_master};
use crate::failover::{Connector, FailoverTransport};
use crate::pool::RedisPool;
use crate::resolve::{ResolvedConfig, SentinelSettings, Target};

/// 存储适配器使用的后端命令集合
#[async_trait]
pub trait Transport: Send + Sync {
    /// PING
    async fn ping(&self) -> StorageResult<()>;

    /// GET，键不存在返回 `None`
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// SET，`expiry` 为 `None` 时不过期
    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()>;

    /// DEL
    async fn del(&self, key: &str) -> StorageResult<()>;

    /// FLUSHDB
    async fn flush_db(&self) -> StorageResult<()>;

    /// 释放全部连接
    async fn close(&self) -> StorageResult<()>;
}

/// 构建 SET 命令：整秒使用 EX，否则使用 PX
pub(crate) fn set_cmd(key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<redis::Cmd> {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    match expiry.filter(|e| !e.is_zero()) {
        Some(e) if e.subsec_nanos() == 0 => {
            cmd.arg("EX").arg(e.as_secs());
        }
        Some(e) => {
            let millis = u64::try_from(e.as_millis())
                .map_err(|_| StorageError::backend(format!("Expiry out of range: {:?}", e)))?;
            cmd.arg("PX").arg(millis.max(1));
        }
        None => {}
    }
    Ok(cmd)
}

/// 按配置选择的 Redis 传输
pub enum RedisTransport {
    /// 连接池直连
    Pooled(RedisPool),
    /// 客户端缓存
    Cached(CachedClient),
    /// 哨兵发现的主节点，节点丢失后重新发现
    Sentinel(FailoverTransport<SentinelConnector>),
}

impl RedisTransport {
    /// 创建客户端并建立连接
    ///
    /// 直连时按顺序尝试候选地址，返回第一个建立成功的传输。
    pub async fn connect(config: &ResolvedConfig) -> StorageResult<Self> {
        match &config.target {
            Target::Direct => {
                let mut last_error = None;
                for address in &config.node.addresses {
                    let client = direct_client(config, address)?;
                    match Self::with_client(client, config).await {
                        Ok(transport) => return Ok(transport),
                        Err(e) => {
                            warn!(address = %address, error = %e, "Redis address unreachable");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error
                    .unwrap_or_else(|| StorageError::config("No Redis address configured")))
            }
            Target::Sentinel(sentinel) => {
                let connector = SentinelConnector {
                    config: config.clone(),
                    sentinel: sentinel.clone(),
                };
                FailoverTransport::connect(connector).await.map(Self::Sentinel)
            }
        }
    }

    /// 在已创建的客户端上建立连接池或客户端缓存连接
    async fn with_client(client: Client, config: &ResolvedConfig) -> StorageResult<Self> {
        let client_name = config.node.client_name.as_deref();

        match &config.client_cache {
            Some(cache) => CachedClient::connect(
                client,
                cache,
                client_name,
                config.connection_timeout,
                config.response_timeout,
            )
            .await
            .map(Self::Cached),
            None => RedisPool::connect(client, config, client_name)
                .await
                .map(Self::Pooled),
        }
    }

    pub fn as_pool(&self) -> Option<&RedisPool> {
        match self {
            Self::Pooled(pool) => Some(pool),
            _ => None,
        }
    }

    pub fn as_cached(&self) -> Option<&CachedClient> {
        match self {
            Self::Cached(client) => Some(client),
            _ => None,
        }
    }

    pub fn as_failover(&self) -> Option<&FailoverTransport<SentinelConnector>> {
        match self {
            Self::Sentinel(transport) => Some(transport),
            _ => None,
        }
    }
}

/// 每次连接都向哨兵查询当前主节点
pub struct SentinelConnector {
    config: ResolvedConfig,
    sentinel: SentinelSettings,
}

#[async_trait]
impl Connector for SentinelConnector {
    type Transport = RedisTransport;

    async fn connect(&self) -> StorageResult<RedisTransport> {
        let client = discover_master(&self.config, &self.sentinel).await?;
        RedisTransport::with_client(client, &self.config).await
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn ping(&self) -> StorageResult<()> {
        match self {
            Self::Pooled(t) => t.ping().await,
            Self::Cached(t) => t.ping().await,
            Self::Sentinel(t) => t.ping().await,
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match self {
            Self::Pooled(t) => t.get(key).await,
            Self::Cached(t) => t.get(key).await,
            Self::Sentinel(t) => t.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()> {
        match self {
            Self::Pooled(t) => t.set(key, value, expiry).await,
            Self::Cached(t) => t.set(key, value, expiry).await,
            Self::Sentinel(t) => t.set(key, value, expiry).await,
        }
    }

    async fn del(&self, key: &str) -> StorageResult<()> {
        match self {
            Self::Pooled(t) => t.del(key).await,
            Self::Cached(t) => t.del(key).await,
            Self::Sentinel(t) => t.del(key).await,
        }
    }

    async fn flush_db(&self) -> StorageResult<()> {
        match self {
            Self::Pooled(t) => t.flush_db().await,
            Self::Cached(t) => t.flush_db().await,
            Self::Sentinel(t) => t.flush_db().await,
        }
    }

    async fn close(&self) -> StorageResult<()> {
        match self {
            Self::Pooled(t) => t.close().await,
            Self::Cached(t) => t.close().await,
            Self::Sentinel(t) => t.close().await,
        }
    }
}

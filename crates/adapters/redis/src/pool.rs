//! Redis 连接池管理
//!
//! 固定数量的 `ConnectionManager`（断线自动重连），轮询分配，信号量限制并发命令数

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use rstore_errors::{StorageError, StorageResult};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::connection::set_client_name;
use crate::resolve::ResolvedConfig;
use crate::retry::command_error;
use crate::transport::{Transport, set_cmd};

/// 连接池状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// 总连接数
    pub total_connections: usize,
    /// 正在执行命令的连接数
    pub active_connections: usize,
    /// 空闲连接数
    pub idle_connections: usize,
    /// 最大连接数
    pub max_connections: usize,
    /// 是否已关闭
    pub closed: bool,
}

/// Redis 连接池
pub struct RedisPool {
    /// 连接管理器列表，关闭后为空
    connections: RwLock<Vec<ConnectionManager>>,
    /// 并发控制信号量
    semaphore: Arc<Semaphore>,
    /// 当前活跃连接计数
    active_count: Arc<AtomicUsize>,
    /// 轮询索引
    round_robin_index: AtomicUsize,
    pool_size: usize,
}

impl RedisPool {
    /// 创建连接池并建立全部连接
    ///
    /// 不可达时每条连接最多重试 `connect_retries` 次后失败。
    pub async fn connect(
        client: Client,
        config: &ResolvedConfig,
        client_name: Option<&str>,
    ) -> StorageResult<Self> {
        let pool_size = config.pool_size.max(1);
        let mut connections = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let mut conn = ConnectionManager::new_with_config(client.clone(), manager_config(config))
                .await
            .map_err(|e| {
                StorageError::connection(format!("Failed to create Redis connection {}: {}", i, e))
            })?;
            set_client_name(&mut conn, client_name).await?;
            connections.push(conn);
        }

        info!(pool_size = pool_size, "Redis connection pool created");
        Ok(Self::from_connections(connections, pool_size))
    }

    /// 用已建立的连接组装连接池，`pool_size` 为并发命令上限
    pub fn from_connections(connections: Vec<ConnectionManager>, pool_size: usize) -> Self {
        Self {
            connections: RwLock::new(connections),
            semaphore: Arc::new(Semaphore::new(pool_size)),
            active_count: Arc::new(AtomicUsize::new(0)),
            round_robin_index: AtomicUsize::new(0),
            pool_size,
        }
    }

    /// 获取一个连接，池已关闭时返回 `StorageError::Closed`
    pub async fn acquire(&self) -> StorageResult<PooledConnection> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Closed)?;

        let conn = {
            let connections = self.connections.read();
            if connections.is_empty() {
                return Err(StorageError::Closed);
            }
            let index =
                self.round_robin_index.fetch_add(1, Ordering::Relaxed) % connections.len();
            connections[index].clone()
        };
        self.active_count.fetch_add(1, Ordering::SeqCst);

        Ok(PooledConnection {
            conn,
            active_count: self.active_count.clone(),
            _permit: permit,
        })
    }

    /// 获取连接池状态
    pub fn status(&self) -> PoolStatus {
        let active = self.active_count.load(Ordering::SeqCst);
        let total = self.connections.read().len();

        PoolStatus {
            total_connections: total,
            active_connections: active,
            idle_connections: total.saturating_sub(active),
            max_connections: self.pool_size,
            closed: self.semaphore.is_closed(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    async fn query<T: redis::FromRedisValue>(
        &self,
        operation: &str,
        cmd: &redis::Cmd,
    ) -> StorageResult<T> {
        let mut conn = self.acquire().await?;
        cmd.query_async::<T>(&mut conn.conn)
            .await
            .map_err(|e| command_error(operation, e))
    }
}

fn manager_config(config: &ResolvedConfig) -> ConnectionManagerConfig {
    let mut manager = ConnectionManagerConfig::new()
        .set_number_of_retries(config.connect_retries)
        .set_max_delay(config.max_reconnect_delay.as_millis() as u64);
    if let Some(timeout) = config.connection_timeout {
        manager = manager.set_connection_timeout(timeout);
    }
    if let Some(timeout) = config.response_timeout {
        manager = manager.set_response_timeout(timeout);
    }
    manager
}

/// 池化的连接，释放时归还并发许可
pub struct PooledConnection {
    conn: ConnectionManager,
    active_count: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RedisPool {
    async fn ping(&self) -> StorageResult<()> {
        self.query::<String>("PING", &redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.query("GET", &cmd).await
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
        if self.semaphore.is_closed() {
            return Ok(());
        }
        self.semaphore.close();
        let released = {
            let mut connections = self.connections.write();
            std::mem::take(&mut *connections).len()
        };
        debug!(connections = released, "Redis connection pool closed");
        Ok(())
    }
}

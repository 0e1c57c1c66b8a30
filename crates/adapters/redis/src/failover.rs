//! 故障转移传输
//!
//! 持有当前节点的传输；命令返回 [`StorageError::Unavailable`]（连接断开、节点降为只读）时，
//! 通过 [`Connector`] 重新发现节点并重建传输，然后重试一次该命令。

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rstore_errors::{StorageError, StorageResult};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::transport::Transport;

/// 每次调用都重新定位节点并建立传输
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self) -> StorageResult<Self::Transport>;
}

/// 节点丢失后自动重连的传输
pub struct FailoverTransport<C: Connector> {
    connector: C,
    current: RwLock<Arc<C::Transport>>,
    /// 串行化重建，并发失败的请求只触发一次重新发现
    refresh_lock: Mutex<()>,
    closed: AtomicBool,
    rediscoveries: AtomicUsize,
}

impl<C: Connector> FailoverTransport<C> {
    /// 首次定位节点并建立传输
    pub async fn connect(connector: C) -> StorageResult<Self> {
        let transport = connector.connect().await?;
        Ok(Self {
            connector,
            current: RwLock::new(Arc::new(transport)),
            refresh_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            rediscoveries: AtomicUsize::new(0),
        })
    }

    /// 首次建立之后重新发现节点的次数
    pub fn rediscoveries(&self) -> usize {
        self.rediscoveries.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<C::Transport> {
        self.current.read().clone()
    }

    async fn run<R, F, Fut>(&self, operation: &'static str, command: F) -> StorageResult<R>
    where
        F: Fn(Arc<C::Transport>) -> Fut + Send + Sync,
        Fut: Future<Output = StorageResult<R>> + Send,
        R: Send,
    {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let transport = self.current();
        match command(transport.clone()).await {
            // 旧传输被并发的重建关闭时也换到新传输上重试
            Err(e) if e.is_unavailable() || (e.is_closed() && !self.is_closed()) => {
                warn!(operation = operation, error = %e, "Redis node lost, rediscovering");
                let fresh = self.refresh(&transport).await?;
                command(fresh).await
            }
            result => result,
        }
    }

    async fn refresh(&self, stale: &Arc<C::Transport>) -> StorageResult<Arc<C::Transport>> {
        let _guard = self.refresh_lock.lock().await;
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let current = self.current();
        if !Arc::ptr_eq(&current, stale) {
            return Ok(current);
        }

        let fresh = Arc::new(self.connector.connect().await?);
        *self.current.write() = fresh.clone();
        let count = self.rediscoveries.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = stale.close().await {
            warn!(error = %e, "Failed to release stale Redis transport");
        }
        info!(rediscoveries = count, "Redis node rediscovered");
        Ok(fresh)
    }
}

#[async_trait]
impl<C: Connector> Transport for FailoverTransport<C> {
    async fn ping(&self) -> StorageResult<()> {
        self.run("PING", |t| async move { t.ping().await }).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.run("GET", |t| async move { t.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()> {
        self.run("SET", |t| async move { t.set(key, value, expiry).await })
            .await
    }

    async fn del(&self, key: &str) -> StorageResult<()> {
        self.run("DEL", |t| async move { t.del(key).await }).await
    }

    async fn flush_db(&self) -> StorageResult<()> {
        self.run("FLUSHDB", |t| async move { t.flush_db().await })
            .await
    }

    async fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.refresh_lock.lock().await;
        self.current().close().await
    }
}

//! Redis 键值存储适配器

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rstore_config::StorageConfig;
use rstore_errors::{StorageError, StorageResult};
use rstore_ports::KeyValueStorage;
use tracing::{info, warn};

use crate::recorder::record_operation;
use crate::resolve::resolve;
use crate::transport::{RedisTransport, Transport};

/// Redis 存储
///
/// 构造过程要么返回已通过 PING 探活（并按需清空）的实例，要么返回错误，不会留下半初始化的连接。
pub struct RedisStorage<T = RedisTransport> {
    transport: T,
}

impl RedisStorage {
    /// 解析配置、建立连接并探活
    pub async fn connect(config: StorageConfig) -> StorageResult<Self> {
        let resolved = resolve(config)?;
        let transport = RedisTransport::connect(&resolved).await?;
        Self::with_transport(transport, resolved.reset).await
    }
}

impl<T: Transport> RedisStorage<T> {
    /// 使用已建立的传输创建存储
    pub async fn with_transport(transport: T, reset: bool) -> StorageResult<Self> {
        if let Err(e) = initialize(&transport, reset).await {
            if let Err(close_err) = transport.close().await {
                warn!(error = %close_err, "Failed to release transport after init failure");
            }
            return Err(e);
        }

        info!(reset = reset, "Redis storage ready");
        Ok(Self { transport })
    }
}

async fn initialize<T: Transport>(transport: &T, reset: bool) -> StorageResult<()> {
    transport
        .ping()
        .await
        .map_err(|e| StorageError::connection(format!("Redis liveness check failed: {}", e)))?;

    if reset {
        transport
            .flush_db()
            .await
            .map_err(|e| StorageError::connection(format!("Redis startup reset failed: {}", e)))?;
        info!("Redis database flushed on startup");
    }
    Ok(())
}

fn outcome<V>(result: &StorageResult<V>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

fn log_failure<V>(operation: &str, result: &StorageResult<V>) {
    if let Err(e) = result {
        warn!(operation = operation, error = %e, "Storage operation failed");
    }
}

#[async_trait]
impl<T: Transport> KeyValueStorage for RedisStorage<T> {
    type Conn = T;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let started = Instant::now();
        if key.is_empty() {
            record_operation("get", "skipped", started);
            return Ok(None);
        }

        let result = self.transport.get(key).await;
        let label = match &result {
            Ok(Some(_)) => "hit",
            Ok(None) => "miss",
            Err(e) => e.kind(),
        };
        record_operation("get", label, started);
        log_failure("get", &result);
        result
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()> {
        let started = Instant::now();
        if key.is_empty() || value.is_empty() {
            record_operation("set", "skipped", started);
            return Ok(());
        }

        let expiry = expiry.filter(|e| !e.is_zero());
        let result = self.transport.set(key, value, expiry).await;
        record_operation("set", outcome(&result), started);
        log_failure("set", &result);
        result
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let started = Instant::now();
        if key.is_empty() {
            record_operation("delete", "skipped", started);
            return Ok(());
        }

        let result = self.transport.del(key).await;
        record_operation("delete", outcome(&result), started);
        log_failure("delete", &result);
        result
    }

    async fn reset(&self) -> StorageResult<()> {
        let started = Instant::now();
        let result = self.transport.flush_db().await;
        record_operation("reset", outcome(&result), started);
        log_failure("reset", &result);
        result
    }

    async fn close(&self) -> StorageResult<()> {
        let result = self.transport.close().await;
        if result.is_ok() {
            info!("Redis storage closed");
        }
        result
    }

    fn conn(&self) -> &T {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct State {
        entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
        calls: Mutex<Vec<String>>,
        fail_ping: AtomicBool,
        fail_flush: AtomicBool,
        fail_commands: AtomicBool,
        closed: AtomicBool,
    }

    /// 内存传输，记录收到的命令
    #[derive(Clone, Default)]
    struct MemoryTransport {
        state: Arc<State>,
    }

    impl MemoryTransport {
        fn with_entry(self, key: &str, value: &[u8]) -> Self {
            self.state
                .entries
                .lock()
                .insert(key.to_string(), (value.to_vec(), None));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.state.calls.lock().clone()
        }

        fn record(&self, call: String) -> StorageResult<()> {
            self.state.calls.lock().push(call);
            if self.state.closed.load(Ordering::SeqCst) {
                return Err(StorageError::Closed);
            }
            if self.state.fail_commands.load(Ordering::SeqCst) {
                return Err(StorageError::backend("connection reset by peer"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn ping(&self) -> StorageResult<()> {
            self.record("PING".to_string())?;
            if self.state.fail_ping.load(Ordering::SeqCst) {
                return Err(StorageError::backend("connection refused"));
            }
            Ok(())
        }

        async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.record(format!("GET {}", key))?;
            let mut entries = self.state.entries.lock();
            let expired = matches!(
                entries.get(key),
                Some((_, Some(deadline))) if *deadline <= Instant::now()
            );
            if expired {
                entries.remove(key);
            }
            Ok(entries.get(key).map(|(value, _)| value.clone()))
        }

        async fn set(
            &self,
            key: &str,
            value: &[u8],
            expiry: Option<Duration>,
        ) -> StorageResult<()> {
            self.record(format!("SET {} {:?}", key, expiry))?;
            self.state.entries.lock().insert(
                key.to_string(),
                (value.to_vec(), expiry.map(|e| Instant::now() + e)),
            );
            Ok(())
        }

        async fn del(&self, key: &str) -> StorageResult<()> {
            self.record(format!("DEL {}", key))?;
            self.state.entries.lock().remove(key);
            Ok(())
        }

        async fn flush_db(&self) -> StorageResult<()> {
            self.record("FLUSHDB".to_string())?;
            if self.state.fail_flush.load(Ordering::SeqCst) {
                return Err(StorageError::backend("READONLY replica"));
            }
            self.state.entries.lock().clear();
            Ok(())
        }

        async fn close(&self) -> StorageResult<()> {
            self.state.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn storage(transport: &MemoryTransport) -> RedisStorage<MemoryTransport> {
        RedisStorage::with_transport(transport.clone(), false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("john", b"doe", None).await.unwrap();
        assert_eq!(store.get("john").await.unwrap(), Some(b"doe".to_vec()));

        store.set("bin", &[0, 159, 146, 150], Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(store.get("bin").await.unwrap(), Some(vec![0, 159, 146, 150]));
    }

    #[tokio::test]
    async fn test_set_overrides_existing_value() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("k", b"v1", None).await.unwrap();
        store.set("k", b"v2", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_get_missing_key_is_absent() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_inputs_are_noops() {
        let transport = MemoryTransport::default().with_entry("k", b"v");
        let store = storage(&transport).await;
        let calls_before = transport.calls();

        assert_eq!(store.get("").await.unwrap(), None);
        store.set("", b"v", None).await.unwrap();
        store.set("k", b"", None).await.unwrap();
        store.delete("").await.unwrap();

        assert_eq!(transport.calls(), calls_before);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_zero_expiry_means_no_expiry() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("k", b"v", Some(Duration::ZERO)).await.unwrap();
        assert!(transport.calls().contains(&"SET k None".to_string()));
    }

    #[tokio::test]
    async fn test_expiry_is_honored() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("k", b"v", Some(Duration::from_millis(20))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("k", b"v", None).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // 删除不存在的键不是错误
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;

        store.set("a", b"1", None).await.unwrap();
        store.set("b", b"2", None).await.unwrap();
        store.reset().await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reset_on_startup() {
        let transport = MemoryTransport::default().with_entry("a", b"b");
        let store = RedisStorage::with_transport(transport.clone(), true)
            .await
            .unwrap();

        assert_eq!(&transport.calls()[..2], ["PING", "FLUSHDB"]);
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_ping_is_fatal_and_releases_transport() {
        let transport = MemoryTransport::default();
        transport.state.fail_ping.store(true, Ordering::SeqCst);

        let err = RedisStorage::with_transport(transport.clone(), true)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Connection(_)));
        assert!(transport.state.closed.load(Ordering::SeqCst));
        assert_eq!(transport.calls(), ["PING"]);
    }

    #[tokio::test]
    async fn test_startup_reset_failure_is_fatal() {
        let transport = MemoryTransport::default().with_entry("a", b"b");
        transport.state.fail_flush.store(true, Ordering::SeqCst);

        let err = RedisStorage::with_transport(transport.clone(), true)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StorageError::Connection(_)));
        assert!(transport.state.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;
        transport.state.fail_commands.store(true, Ordering::SeqCst);

        assert!(matches!(store.get("k").await, Err(StorageError::Backend(_))));
        assert!(matches!(
            store.set("k", b"v", None).await,
            Err(StorageError::Backend(_))
        ));
        assert!(matches!(store.delete("k").await, Err(StorageError::Backend(_))));
        assert!(matches!(store.reset().await, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_cleanly() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;
        let other = storage(&MemoryTransport::default()).await;
        other.set("k", b"v", None).await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.get("k").await, Err(StorageError::Closed)));
        assert!(matches!(
            store.set("k", b"v", None).await,
            Err(StorageError::Closed)
        ));
        assert_eq!(other.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_conn_exposes_transport() {
        let transport = MemoryTransport::default();
        let store = storage(&transport).await;
        assert!(Arc::ptr_eq(&store.conn().state, &transport.state));
    }

    #[test]
    fn test_failure_outcome_is_error_kind() {
        assert_eq!(outcome(&Ok::<(), StorageError>(())), "ok");
        assert_eq!(outcome::<()>(&Err(StorageError::Closed)), "closed");
        assert_eq!(
            outcome::<()>(&Err(StorageError::unavailable("READONLY"))),
            "unavailable"
        );
    }
}

//! KeyValueStorage trait 定义

use async_trait::async_trait;
use rstore_errors::StorageResult;
use std::time::Duration;

/// 键值存储 trait
///
/// 空键的 get/set/delete 以及空值的 set 都是静默的空操作，返回成功且不访问后端。
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// 底层连接句柄类型
    type Conn: Send + Sync;

    /// 获取值，键不存在时返回 `Ok(None)`
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// 设置值，`expiry` 为 `None` 或零表示永不过期
    async fn set(&self, key: &str, value: &[u8], expiry: Option<Duration>) -> StorageResult<()>;

    /// 删除键
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// 清空当前数据库
    async fn reset(&self) -> StorageResult<()>;

    /// 释放底层连接，之后的操作返回 `StorageError::Closed`
    async fn close(&self) -> StorageResult<()>;

    /// 获取底层连接句柄（所有权仍归存储实例）
    fn conn(&self) -> &Self::Conn;
}

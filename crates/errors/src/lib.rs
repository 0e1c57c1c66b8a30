//! rstore-errors - 统一错误处理
//!
//! 区分构造期错误（配置、连接、探活）与运行期错误（后端命令失败、节点不可用、已关闭）

use thiserror::Error;

/// 存储错误类型
#[derive(Debug, Error)]
pub enum StorageError {
    /// 配置无效（URL 解析失败、哨兵参数缺失、TLS 证书不可读等）
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// 建立连接失败
    #[error("Connection error: {0}")]
    Connection(String),

    /// 后端命令执行失败
    #[error("Backend error: {0}")]
    Backend(String),

    /// 节点连接丢失或节点已降为只读副本
    #[error("Node unavailable: {0}")]
    Unavailable(String),

    /// 存储已关闭
    #[error("Storage is closed")]
    Closed,
}

impl StorageError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// 是否为构造期错误
    pub fn is_construction_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Connection(_))
    }

    /// 是否因存储已关闭而失败
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// 是否应重新发现节点后再试
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// 用于 metrics 标签的简短分类
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection(_) => "connection",
            Self::Backend(_) => "backend",
            Self::Unavailable(_) => "unavailable",
            Self::Closed => "closed",
        }
    }
}

/// Result 类型别名
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            StorageError::config("bad url").to_string(),
            "Invalid configuration: bad url"
        );
        assert_eq!(
            StorageError::backend("WRONGTYPE").to_string(),
            "Backend error: WRONGTYPE"
        );
        assert_eq!(StorageError::Closed.to_string(), "Storage is closed");
    }

    #[test]
    fn test_error_classification() {
        assert!(StorageError::config("x").is_construction_error());
        assert!(StorageError::connection("x").is_construction_error());
        assert!(!StorageError::backend("x").is_construction_error());
        assert!(StorageError::Closed.is_closed());
        assert!(StorageError::unavailable("READONLY").is_unavailable());
        assert!(!StorageError::unavailable("x").is_construction_error());
        assert!(!StorageError::backend("x").is_unavailable());
        assert_eq!(StorageError::connection("x").kind(), "connection");
        assert_eq!(StorageError::unavailable("x").kind(), "unavailable");
    }
}

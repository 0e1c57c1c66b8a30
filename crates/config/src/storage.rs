//! 存储配置
//!
//! 零值字段（空 host、端口 0、连接池大小 0 等）在 [`StorageConfig::resolved`] 中回落到默认值。

use std::path::PathBuf;
use std::time::Duration;

use secrecy::Secret;
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_CACHE_SIZE_EACH_CONN: usize = 10_000;
pub const DEFAULT_PIPELINE_MULTIPLEX: u8 = 2;
/// 2^8 = 256 条连接
pub const MAX_PIPELINE_MULTIPLEX: u8 = 8;
/// 断线重连（含建连）的重试次数
pub const DEFAULT_CONNECT_RETRIES: usize = 2;
/// 重连退避的单次最大等待
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 1_000;

/// Redis 部署模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedisMode {
    /// 单机模式
    #[default]
    Standalone,
    /// 哨兵模式（故障转移）
    Sentinel,
}

/// 哨兵配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// 主节点名称
    pub master_name: String,
    /// 哨兵节点列表（`host:port`，端口缺省为 26379）
    pub hosts: Vec<String>,
    /// 哨兵用户名
    pub username: Option<String>,
    /// 哨兵密码
    pub password: Option<Secret<String>>,
}

/// TLS 配置
///
/// 存在即启用 TLS；证书路径均为 PEM 文件。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// 跳过服务端证书校验
    pub insecure: bool,
    /// 自定义根证书
    pub root_cert: Option<PathBuf>,
    /// 客户端证书（需与 client_key 同时提供）
    pub client_cert: Option<PathBuf>,
    /// 客户端私钥
    pub client_key: Option<PathBuf>,
}

/// 客户端缓存配置（RESP3 server-assisted client-side caching）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientCacheConfig {
    /// 本地缓存条目的存活时间（秒）
    pub cache_ttl_secs: u64,
    /// 每条连接的本地缓存条目上限
    pub cache_size_each_conn: usize,
    /// 连接数 = 2^pipeline_multiplex
    pub pipeline_multiplex: u8,
    /// 关闭只读命令的自动重试
    pub disable_retry: bool,
    /// 关闭本地缓存（仍使用 RESP3 多路复用连接）
    pub disable_cache: bool,

    // 以下选项为兼容 rueidis 配置而接受，redis-rs 没有对应调节项，设置后只记录告警
    pub ring_scale_each_conn: Option<u32>,
    pub read_buffer_each_conn: Option<usize>,
    pub write_buffer_each_conn: Option<usize>,
    pub blocking_pool_size: Option<usize>,
    /// 多路复用连接本身总是流水线发送
    pub always_pipelining: bool,
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_size_each_conn: DEFAULT_CACHE_SIZE_EACH_CONN,
            pipeline_multiplex: DEFAULT_PIPELINE_MULTIPLEX,
            disable_retry: false,
            disable_cache: false,
            ring_scale_each_conn: None,
            read_buffer_each_conn: None,
            write_buffer_each_conn: None,
            blocking_pool_size: None,
            always_pipelining: false,
        }
    }
}

impl ClientCacheConfig {
    /// 本地缓存 TTL
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// 多路复用连接数
    pub fn connection_count(&self) -> usize {
        1usize << self.pipeline_multiplex.min(MAX_PIPELINE_MULTIPLEX)
    }

    /// 已设置但不生效的选项名
    pub fn ignored_options(&self) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.ring_scale_each_conn.is_some() {
            ignored.push("ring_scale_each_conn");
        }
        if self.read_buffer_each_conn.is_some() {
            ignored.push("read_buffer_each_conn");
        }
        if self.write_buffer_each_conn.is_some() {
            ignored.push("write_buffer_each_conn");
        }
        if self.blocking_pool_size.is_some() {
            ignored.push("blocking_pool_size");
        }
        if self.always_pipelining {
            ignored.push("always_pipelining");
        }
        ignored
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub host: String,
    pub port: u16,
    /// 候选地址列表（`host:port`），非空时取代 host/port，按顺序取第一个可连接的
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    /// 数据库索引
    pub database: i64,
    pub client_name: Option<String>,
    /// 连接 URL（`redis://` / `rediss://` / `unix://`），其中携带的值覆盖对应的独立字段
    pub url: Option<Secret<String>>,
    pub tls: Option<TlsConfig>,
    /// 连接池大小，同时也是并发命令上限
    pub pool_size: usize,
    pub mode: RedisMode,
    pub sentinel: Option<SentinelConfig>,
    /// 设置后使用客户端缓存传输
    pub client_cache: Option<ClientCacheConfig>,
    /// 启动时清空数据库
    pub reset: bool,
    pub connection_timeout_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    /// 断线重连的重试次数，也限制了不可达时构造失败前的等待
    pub connect_retries: usize,
    pub max_reconnect_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            addresses: Vec::new(),
            username: None,
            password: None,
            database: 0,
            client_name: None,
            url: None,
            tls: None,
            pool_size: DEFAULT_POOL_SIZE,
            mode: RedisMode::default(),
            sentinel: None,
            client_cache: None,
            reset: false,
            connection_timeout_ms: None,
            response_timeout_ms: None,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
        }
    }
}

impl StorageConfig {
    /// 使用连接 URL 创建配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(Secret::new(url.into())),
            ..Default::default()
        }
    }

    /// 使用 host/port 创建配置
    pub fn from_host(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// 使用候选地址列表创建配置
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(Secret::new(password.into()));
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = Some(name.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// 设置哨兵模式
    pub fn with_sentinel(mut self, sentinel: SentinelConfig) -> Self {
        self.mode = RedisMode::Sentinel;
        self.sentinel = Some(sentinel);
        self
    }

    /// 启用客户端缓存
    pub fn with_client_cache(mut self, cache: ClientCacheConfig) -> Self {
        self.client_cache = Some(cache);
        self
    }

    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_timeouts(mut self, connection: Duration, response: Duration) -> Self {
        self.connection_timeout_ms = Some(connection.as_millis() as u64);
        self.response_timeout_ms = Some(response.as_millis() as u64);
        self
    }

    pub fn with_connect_retries(mut self, retries: usize) -> Self {
        self.connect_retries = retries;
        self
    }

    pub fn is_sentinel(&self) -> bool {
        self.mode == RedisMode::Sentinel
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_ms.map(Duration::from_millis)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    /// 用默认值填充零值字段
    pub fn resolved(mut self) -> Self {
        if self.host.trim().is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.pool_size == 0 {
            self.pool_size = DEFAULT_POOL_SIZE;
        }
        if self.max_reconnect_delay_ms == 0 {
            self.max_reconnect_delay_ms = DEFAULT_MAX_RECONNECT_DELAY_MS;
        }
        self.addresses.retain(|a| !a.trim().is_empty());
        if self.username.as_deref().is_some_and(str::is_empty) {
            self.username = None;
        }
        if self.client_name.as_deref().is_some_and(str::is_empty) {
            self.client_name = None;
        }
        if let Some(cache) = self.client_cache.as_mut() {
            if cache.cache_ttl_secs == 0 {
                cache.cache_ttl_secs = DEFAULT_CACHE_TTL_SECS;
            }
            if cache.cache_size_each_conn == 0 {
                cache.cache_size_each_conn = DEFAULT_CACHE_SIZE_EACH_CONN;
            }
            cache.pipeline_multiplex = cache.pipeline_multiplex.min(MAX_PIPELINE_MULTIPLEX);
        }
        self
    }
}

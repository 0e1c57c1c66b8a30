//! 配置解析
//!
//! 把 [`StorageConfig`] 解析为可直接用于建立连接的参数。
//! 连接 URL 中携带的值（地址、TLS、用户名、密码、数据库、client_name）覆盖对应的独立字段，
//! URL 未携带的值保留独立字段。哨兵模式下地址由哨兵发现，URL 中的地址被忽略。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use rstore_config::{
    ClientCacheConfig, DEFAULT_PORT, DEFAULT_SENTINEL_PORT, RedisMode, StorageConfig, TlsConfig,
};
use rstore_errors::{StorageError, StorageResult};
use secrecy::ExposeSecret;
use tracing::{debug, warn};
use url::Url;

/// 数据节点地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAddress {
    Tcp { host: String, port: u16 },
    /// Unix domain socket
    Unix(PathBuf),
}

impl NodeAddress {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// 数据节点连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// 候选地址，按顺序尝试
    pub addresses: Vec<NodeAddress>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
    pub client_name: Option<String>,
    pub tls: Option<TlsSettings>,
}

/// TLS 参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub insecure: bool,
    pub root_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl From<&TlsConfig> for TlsSettings {
    fn from(tls: &TlsConfig) -> Self {
        Self {
            insecure: tls.insecure,
            root_cert: tls.root_cert.clone(),
            client_cert: tls.client_cert.clone(),
            client_key: tls.client_key.clone(),
        }
    }
}

/// 哨兵参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelSettings {
    pub master_name: String,
    pub hosts: Vec<(String, u16)>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// 目标发现策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// 直连 `NodeSettings` 中的地址
    Direct,
    /// 通过哨兵发现主节点，连接丢失后重新发现
    Sentinel(SentinelSettings),
}

/// 解析后的完整配置
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub node: NodeSettings,
    pub target: Target,
    pub pool_size: usize,
    pub client_cache: Option<ClientCacheConfig>,
    pub reset: bool,
    pub connection_timeout: Option<Duration>,
    pub response_timeout: Option<Duration>,
    pub connect_retries: usize,
    pub max_reconnect_delay: Duration,
}

impl ResolvedConfig {
    /// 是否使用客户端缓存传输
    pub fn uses_client_cache(&self) -> bool {
        self.client_cache.is_some()
    }
}

/// URL 中携带的值，`None` 表示 URL 未携带
#[derive(Debug, PartialEq, Eq)]
struct UrlSettings {
    address: NodeAddress,
    tls: bool,
    insecure: bool,
    username: Option<String>,
    password: Option<String>,
    database: Option<i64>,
    client_name: Option<String>,
}

/// 解析存储配置
pub fn resolve(config: StorageConfig) -> StorageResult<ResolvedConfig> {
    let config = config.resolved();

    let addresses = if config.addresses.is_empty() {
        vec![NodeAddress::tcp(config.host.clone(), config.port)]
    } else {
        config
            .addresses
            .iter()
            .map(|a| parse_host_port(a, DEFAULT_PORT).map(|(host, port)| NodeAddress::tcp(host, port)))
            .collect::<StorageResult<Vec<_>>>()?
    };

    let mut node = NodeSettings {
        addresses,
        username: config.username.clone(),
        password: config.password.as_ref().map(|p| p.expose_secret().clone()),
        database: config.database,
        client_name: config.client_name.clone(),
        tls: config.tls.as_ref().map(TlsSettings::from),
    };

    if let Some(url) = config.url.as_ref() {
        let parsed = parse_url(url.expose_secret())?;
        merge_url(&mut node, parsed, config.is_sentinel());
    }

    let target = match config.mode {
        RedisMode::Standalone => Target::Direct,
        RedisMode::Sentinel => Target::Sentinel(resolve_sentinel(&config)?),
    };

    if target == Target::Direct
        && node.tls.is_some()
        && node.addresses.iter().any(|a| matches!(a, NodeAddress::Unix(_)))
    {
        return Err(StorageError::config("TLS is not supported over unix sockets"));
    }

    if let Some(cache) = config.client_cache.as_ref() {
        for option in cache.ignored_options() {
            warn!(option = option, "Client cache option has no effect with this client, ignoring");
        }
    }

    debug!(
        addresses = node.addresses.len(),
        database = node.database,
        tls = node.tls.is_some(),
        sentinel = matches!(target, Target::Sentinel(_)),
        client_cache = config.client_cache.is_some(),
        "Storage config resolved"
    );

    Ok(ResolvedConfig {
        node,
        target,
        pool_size: config.pool_size,
        client_cache: config.client_cache.clone(),
        reset: config.reset,
        connection_timeout: config.connection_timeout(),
        response_timeout: config.response_timeout(),
        connect_retries: config.connect_retries,
        max_reconnect_delay: config.max_reconnect_delay(),
    })
}

fn merge_url(node: &mut NodeSettings, url: UrlSettings, sentinel: bool) {
    if sentinel {
        warn!("Sentinel mode enabled, ignoring address from connection URL");
    } else {
        node.addresses = vec![url.address];
    }

    if url.tls {
        let tls = node.tls.get_or_insert_with(TlsSettings::default);
        tls.insecure |= url.insecure;
    }
    if url.username.is_some() {
        node.username = url.username;
    }
    if url.password.is_some() {
        node.password = url.password;
    }
    if let Some(database) = url.database {
        node.database = database;
    }
    if url.client_name.is_some() {
        node.client_name = url.client_name;
    }
}

fn parse_url(raw: &str) -> StorageResult<UrlSettings> {
    let url = Url::parse(raw)
        .map_err(|e| StorageError::config(format!("Invalid Redis URL: {}", e)))?;

    let (address, tls, database) = match url.scheme() {
        "redis" | "rediss" => {
            let host = url
                .host_str()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
                .filter(|h| !h.is_empty())
                .ok_or_else(|| StorageError::config("Redis URL has no host"))?;
            let database = match url.path().trim_matches('/') {
                "" => None,
                db => Some(parse_database(db)?),
            };
            (
                NodeAddress::tcp(host, url.port().unwrap_or(DEFAULT_PORT)),
                url.scheme() == "rediss",
                database,
            )
        }
        "unix" => {
            if url.path().is_empty() || url.path() == "/" {
                return Err(StorageError::config("Unix socket URL has no path"));
            }
            let database = query_value(&url, "db").map(|db| parse_database(&db)).transpose()?;
            (NodeAddress::Unix(PathBuf::from(url.path())), false, database)
        }
        other => {
            return Err(StorageError::config(format!(
                "Unsupported Redis URL scheme: {}",
                other
            )));
        }
    };

    let username = Some(url.username())
        .filter(|u| !u.is_empty())
        .map(decode_component)
        .transpose()?;
    let password = url.password().map(decode_component).transpose()?;

    Ok(UrlSettings {
        address,
        tls,
        insecure: url.fragment() == Some("insecure"),
        username,
        password,
        database,
        client_name: query_value(&url, "client_name"),
    })
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn parse_database(raw: &str) -> StorageResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| StorageError::config(format!("Invalid database in Redis URL: {}", raw)))
}

fn decode_component(raw: &str) -> StorageResult<String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| StorageError::config(format!("Invalid percent-encoding in Redis URL: {}", e)))
}

fn resolve_sentinel(config: &StorageConfig) -> StorageResult<SentinelSettings> {
    let sentinel = config
        .sentinel
        .as_ref()
        .ok_or_else(|| StorageError::config("Sentinel mode requires a sentinel section"))?;

    if sentinel.master_name.trim().is_empty() {
        return Err(StorageError::config("Sentinel master name cannot be empty"));
    }
    if sentinel.hosts.is_empty() {
        return Err(StorageError::config("Sentinel hosts cannot be empty"));
    }

    let hosts = sentinel
        .hosts
        .iter()
        .map(|h| parse_host_port(h, DEFAULT_SENTINEL_PORT))
        .collect::<StorageResult<Vec<_>>>()?;

    Ok(SentinelSettings {
        master_name: sentinel.master_name.clone(),
        hosts,
        username: sentinel.username.clone().filter(|u| !u.is_empty()),
        password: sentinel.password.as_ref().map(|p| p.expose_secret().clone()),
    })
}

/// 解析 `host`、`host:port`、`[v6]:port` 形式的地址
pub fn parse_host_port(raw: &str, default_port: u16) -> StorageResult<(String, u16)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StorageError::config("Address cannot be empty"));
    }

    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| StorageError::config(format!("Invalid address: {}", raw)))?;
        let port = match tail {
            "" => default_port,
            _ => match tail.strip_prefix(':') {
                Some(port) => parse_port(port, raw)?,
                None => return Err(StorageError::config(format!("Invalid address: {}", raw))),
            },
        };
        return Ok((host.to_string(), port));
    }

    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), parse_port(port, raw)?)),
        _ => Ok((raw.to_string(), default_port)),
    }
}

fn parse_port(port: &str, raw: &str) -> StorageResult<u16> {
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(StorageError::config(format!("Invalid port in address: {}", raw))),
    }
}

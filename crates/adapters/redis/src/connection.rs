//! Redis 客户端构建
//!
//! 根据解析后的配置直连或通过哨兵发现主节点，得到 `redis::Client`

use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{
    Client, ClientTlsConfig, ConnectionAddr, ConnectionInfo, ProtocolVersion, RedisConnectionInfo,
    TlsCertificates, TlsMode,
};
use rstore_errors::{StorageError, StorageResult};
use tracing::info;

use crate::resolve::{NodeAddress, NodeSettings, ResolvedConfig, SentinelSettings, TlsSettings};

/// 客户端缓存需要 RESP3，启用时数据节点连接使用 RESP3 协议
fn protocol(config: &ResolvedConfig) -> ProtocolVersion {
    if config.uses_client_cache() {
        ProtocolVersion::RESP3
    } else {
        ProtocolVersion::RESP2
    }
}

/// 为指定数据节点地址创建客户端（不建立连接）
pub fn direct_client(config: &ResolvedConfig, address: &NodeAddress) -> StorageResult<Client> {
    let info = ConnectionInfo {
        addr: node_addr(address, config.node.tls.as_ref()),
        redis: node_redis_info(&config.node, protocol(config)),
    };
    let client = build_client(info, config.node.tls.as_ref())?;
    info!(
        address = %address,
        database = config.node.database,
        "Redis client created"
    );
    Ok(client)
}

fn node_redis_info(node: &NodeSettings, protocol: ProtocolVersion) -> RedisConnectionInfo {
    RedisConnectionInfo {
        db: node.database,
        username: node.username.clone(),
        password: node.password.clone(),
        protocol,
        ..Default::default()
    }
}

fn node_addr(address: &NodeAddress, tls: Option<&TlsSettings>) -> ConnectionAddr {
    match address {
        NodeAddress::Tcp { host, port } => connection_addr(host, *port, tls),
        NodeAddress::Unix(path) => ConnectionAddr::Unix(path.clone()),
    }
}

fn connection_addr(host: &str, port: u16, tls: Option<&TlsSettings>) -> ConnectionAddr {
    match tls {
        Some(tls) => ConnectionAddr::TcpTls {
            host: host.to_string(),
            port,
            insecure: tls.insecure,
            tls_params: None,
        },
        None => ConnectionAddr::Tcp(host.to_string(), port),
    }
}

fn build_client(info: ConnectionInfo, tls: Option<&TlsSettings>) -> StorageResult<Client> {
    let certificates = match tls {
        Some(tls) => load_certificates(tls)?,
        None => None,
    };

    let result = match certificates {
        Some(certs) => Client::build_with_tls(info, certs),
        None => Client::open(info),
    };

    result.map_err(|e| StorageError::config(format!("Failed to create Redis client: {}", e)))
}

/// 读取 PEM 证书，未配置任何证书时返回 `None`
fn load_certificates(tls: &TlsSettings) -> StorageResult<Option<TlsCertificates>> {
    let read = |path: &std::path::Path| {
        std::fs::read(path).map_err(|e| {
            StorageError::config(format!("Failed to read {}: {}", path.display(), e))
        })
    };

    let root_cert = tls.root_cert.as_deref().map(read).transpose()?;
    let client_tls = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => Some(ClientTlsConfig {
            client_cert: read(cert.as_path())?,
            client_key: read(key.as_path())?,
        }),
        (None, None) => None,
        _ => {
            return Err(StorageError::config(
                "TLS client_cert and client_key must be set together",
            ));
        }
    };

    if root_cert.is_none() && client_tls.is_none() {
        return Ok(None);
    }
    Ok(Some(TlsCertificates {
        client_tls,
        root_cert,
    }))
}

/// 通过哨兵查询当前主节点，返回指向该主节点的客户端
///
/// 每次调用都会重新查询，故障转移后再次调用即可得到新的主节点。
pub async fn discover_master(
    config: &ResolvedConfig,
    settings: &SentinelSettings,
) -> StorageResult<Client> {
    let tls = config.node.tls.as_ref();
    let redis_info = node_redis_info(&config.node, protocol(config));
    let sentinel_nodes: Vec<ConnectionInfo> = settings
        .hosts
        .iter()
        .map(|(host, port)| ConnectionInfo {
            addr: connection_addr(host, *port, tls),
            redis: RedisConnectionInfo {
                username: settings.username.clone(),
                password: settings.password.clone(),
                ..Default::default()
            },
        })
        .collect();

    let mut sentinel = Sentinel::build(sentinel_nodes)
        .map_err(|e| StorageError::config(format!("Failed to create Sentinel client: {}", e)))?;

    let node_info = SentinelNodeConnectionInfo {
        tls_mode: tls.map(|t| if t.insecure { TlsMode::Insecure } else { TlsMode::Secure }),
        redis_connection_info: Some(redis_info),
    };

    let client = sentinel
        .async_master_for(&settings.master_name, Some(&node_info))
        .await
        .map_err(|e| {
            StorageError::connection(format!(
                "Failed to discover master {} via Sentinel: {}",
                settings.master_name, e
            ))
        })?;

    info!(
        master_name = %settings.master_name,
        sentinels = settings.hosts.len(),
        "Redis master discovered via Sentinel"
    );
    Ok(client)
}

/// 为新连接设置 client name（`CLIENT SETNAME`）
pub async fn set_client_name<C>(conn: &mut C, name: Option<&str>) -> StorageResult<()>
where
    C: redis::aio::ConnectionLike + Send,
{
    let Some(name) = name else {
        return Ok(());
    };

    redis::cmd("CLIENT")
        .arg("SETNAME")
        .arg(name)
        .query_async::<()>(conn)
        .await
        .map_err(|e| StorageError::connection(format!("Redis CLIENT SETNAME failed: {}", e)))
}

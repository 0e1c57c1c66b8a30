//! rstore-adapter-redis - Redis 键值存储适配器
//!
//! 单机（含候选地址列表、unix socket）/ 哨兵两种目标发现方式，连接池 / 客户端缓存两种传输，统一实现 [`KeyValueStorage`]。
//!
//! [`KeyValueStorage`]: rstore_ports::KeyValueStorage

mod cached;
mod connection;
mod failover;
mod recorder;
mod pool;
mod resolve;
mod retry;
mod storage;
mod transport;

pub use cached::*;
pub use connection::*;
pub use failover::*;
pub use pool::*;
pub use resolve::*;
pub use retry::*;
pub use storage::*;
pub use transport::*;

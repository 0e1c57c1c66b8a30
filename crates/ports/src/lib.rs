//! rstore-ports - 存储端口定义

mod storage;

pub use storage::*;

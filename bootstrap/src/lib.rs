//! rstore-bootstrap - 统一启动骨架

mod runtime;
mod starter;

pub use runtime::*;
pub use starter::*;

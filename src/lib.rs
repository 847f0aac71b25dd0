// src/lib.rs
//! crab-kv 库：config / protocol / command / store / snapshot / engine / server / metrics

pub mod config;    // 启动配置
pub mod protocol;  // RESP 编解码
pub mod command;   // 命令表
pub mod store;     // 带过期的内存存储
pub mod snapshot;  // RDB 快照加载
pub mod engine;    // 命令分发
pub mod server;    // 网络层
pub mod metrics;   // 计数器

pub use command::{Command, CommandKind};
pub use config::Config;
pub use store::Store;

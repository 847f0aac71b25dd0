// src/config.rs

//! 进程配置：
//! - 命令行参数（clap）
//! - 可选的 JSON 配置文件（serde_json），命令行优先
//! - 启动后只读，通过 `CONFIG GET` 暴露 `dir` / `dbfilename`

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// 可识别的配置名
pub const CONFIG_DIR: &str = "dir";
pub const CONFIG_DBFILENAME: &str = "dbfilename";

/// 默认监听地址
pub const DEFAULT_BIND: &str = "0.0.0.0:6379";

/// 命令行参数
#[derive(Parser, Debug, Default)]
#[command(name = "crab-kv", version, about = "A minimal RESP key-value server")]
pub struct Args {
    /// RDB 快照所在目录
    #[arg(long)]
    pub dir: Option<String>,

    /// RDB 快照文件名
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// 监听地址，例如 0.0.0.0:6379
    #[arg(long)]
    pub bind: Option<String>,

    /// JSON 配置文件路径
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// JSON 配置文件的内容，所有字段都可省略
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
pub struct FileConfig {
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
    pub bind: Option<String>,
}

/// 进程生命周期内不变的最终配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dir: String,
    pub dbfilename: String,
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dir: String::new(),
            dbfilename: String::new(),
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl Config {
    /// 合并配置文件与命令行参数，命令行优先
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_file(path)?,
            None => FileConfig::default(),
        };

        Ok(Config {
            dir: args.dir.clone().or(file.dir).unwrap_or_default(),
            dbfilename: args.dbfilename.clone().or(file.dbfilename).unwrap_or_default(),
            bind: args
                .bind
                .clone()
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
        })
    }

    /// 按名字读取可暴露的配置项，只认 `dir` 和 `dbfilename`
    pub fn get(&self, name: &str) -> Option<(&'static str, &str)> {
        match name.to_ascii_lowercase().as_str() {
            CONFIG_DIR => Some((CONFIG_DIR, self.dir.as_str())),
            CONFIG_DBFILENAME => Some((CONFIG_DBFILENAME, self.dbfilename.as_str())),
            _ => None,
        }
    }

    /// 快照文件路径；未配置 dbfilename 时为 None
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        if self.dbfilename.is_empty() {
            None
        } else {
            Some(Path::new(&self.dir).join(&self.dbfilename))
        }
    }
}

/// 从指定路径读取并反序列化 JSON 配置
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<FileConfig> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let cfg: FileConfig = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(cfg)
}

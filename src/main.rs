// src/main.rs
use clap::Parser;
use crab_kv::{
    config::{Args, Config},
    server,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_args(&args)?;

    // 启动 TCP 服务，默认 0.0.0.0:6379
    server::start(config).await?;
    Ok(())
}

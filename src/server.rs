// src/server.rs
//! 网络层：
//! - 启动时从 RDB 快照恢复数据（失败则以空库启动）
//! - 监听 TCP 连接，每个连接一个 tokio 任务
//! - 循环：解码一帧 → engine 执行 → 写回回复
//! - 收到关闭信号后停止 accept，通知所有连接退出并等待它们结束
use anyhow::{Context, Result};
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    engine,
    metrics::Metrics,
    protocol::{self, ProtocolError},
    snapshot,
    store::Store,
};

/// 所有连接共享的状态：存储是唯一可变的共享资源，配置只读
#[derive(Debug)]
pub struct ServerState {
    pub store: Store,
    pub config: Config,
    pub metrics: Metrics,
}

/// 构造共享状态；配置了 dbfilename 时先加载快照
pub fn bootstrap(config: Config) -> Arc<ServerState> {
    let store = Store::new();
    if let Some(path) = config.snapshot_path() {
        restore_from_snapshot(&store, &path);
    }

    Arc::new(ServerState {
        store,
        config,
        metrics: Metrics::new(),
    })
}

/// 整个快照解码成功后才写入存储，失败时存储保持为空
fn restore_from_snapshot(store: &Store, path: &Path) {
    if !path.exists() {
        info!(path = %path.display(), "snapshot not found, starting with an empty store");
        return;
    }

    match snapshot::load(path) {
        Ok(snap) => {
            let version = snap.header_str();
            let loaded = store.bulk_load(
                snap.entries
                    .into_iter()
                    .map(|e| (e.key, e.value, e.expires_at_ms)),
            );
            info!(
                path = %path.display(),
                version = %version,
                keys = loaded,
                "restored store from snapshot"
            );
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to load snapshot, starting with an empty store"
            );
        }
    }
}

/// 默认入口：加载快照、绑定地址，Ctrl-C 时优雅退出
pub async fn start(config: Config) -> Result<()> {
    let state = bootstrap(config);

    let addr = state.config.bind.clone();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, "crab-kv listening");

    serve(listener, state, wait_for_signal(tokio::signal::ctrl_c())).await
}

/// 等待关闭信号；信号注册失败时永不返回，服务一直运行到进程被杀
async fn wait_for_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// accept 连续失败时的退避：10ms 起步，逐次翻倍，上限 1s
fn accept_backoff(failures: u32) -> Duration {
    let ms = 10u64 << failures.saturating_sub(1).min(7);
    Duration::from_millis(ms.min(1_000))
}

/// 核心循环：不断 accept 新连接并为每个连接 spawn 一个任务
///
/// `shutdown` 完成后停止 accept，通知所有连接不再等待下一帧，等它们全部退出后返回。
pub async fn serve<F>(listener: TcpListener, state: Arc<ServerState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    let mut accept_failures: u32 = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => {
                        accept_failures = 0;
                        conn
                    }
                    Err(e) => {
                        // 例如 EMFILE：退避后重试，避免空转
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "accept failed");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                };
                debug!(%peer, "accepted connection");

                let state = Arc::clone(&state);
                let stop = stop_rx.clone();
                tasks.spawn(async move {
                    state.metrics.client_connected();
                    let result = handle_connection(stream, peer, &state, stop).await;
                    state.metrics.client_disconnected();
                    report_close(peer, &state.metrics, result);
                });
            }

            // 回收已结束的连接任务
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    let _ = stop_tx.send(true);
    while tasks.join_next().await.is_some() {}

    info!(metrics = %state.metrics.summary(), "server stopped");
    Ok(())
}

/// 单个连接：请求严格顺序处理，不做 pipeline
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: &ServerState,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ProtocolError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let frame = tokio::select! {
            frame = protocol::decode_frame(&mut reader) => frame,
            _ = stop.changed() => {
                debug!(%peer, "server shutting down, closing connection");
                return Ok(());
            }
        };

        let cmd = match frame {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return Ok(()),
            Err(ProtocolError::UnsupportedCommand(name)) => {
                // 尽力告知客户端，随后关闭连接
                let msg = format!("ERR unknown command '{}'", name);
                let _ = writer.write_all(&protocol::error(&msg)).await;
                return Err(ProtocolError::UnsupportedCommand(name));
            }
            Err(e) => return Err(e),
        };

        state.metrics.record_command(cmd.name());
        let reply = engine::execute(&cmd, &state.store, &state.config);
        writer.write_all(&reply).await?;
    }
}

fn report_close(peer: SocketAddr, metrics: &Metrics, result: Result<(), ProtocolError>) {
    match result {
        Ok(()) => debug!(%peer, "client disconnected"),
        Err(ProtocolError::Io(e))
            if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe) =>
        {
            debug!(%peer, "client reset connection");
        }
        Err(e) => {
            metrics.record_protocol_error();
            warn!(%peer, error = %e, "closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio::time::timeout;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(4), Duration::from_millis(80));
        assert_eq!(accept_backoff(8), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_signal_resolves_shutdown() {
        let done = timeout(Duration::from_secs(1), wait_for_signal(async { Ok(()) })).await;
        assert!(done.is_ok());
    }

    #[tokio::test]
    async fn test_signal_registration_error_keeps_running() {
        let signal = async { Err(io::Error::other("signal handler unavailable")) };
        let done = timeout(Duration::from_millis(100), wait_for_signal(signal)).await;
        assert!(done.is_err(), "注册失败不应触发关闭");
    }
}

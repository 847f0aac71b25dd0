// src/metrics.rs

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 连接与命令计数，只在日志中输出
#[derive(Default, Debug)]
pub struct Metrics {
    pub connected_clients: AtomicU64,
    pub total_connections: AtomicU64,
    pub command_count: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub command_stats: DashMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_command(&self, command: &str) {
        self.command_count.fetch_add(1, Ordering::Relaxed);
        self.command_stats
            .entry(command.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 一行摘要，形如 `clients=0 connections=3 commands=12 protocol_errors=1 [GET=4 SET=8]`
    pub fn summary(&self) -> String {
        let mut stats: Vec<(String, u64)> = self
            .command_stats
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        stats.sort();
        let stats: Vec<String> = stats.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        format!(
            "clients={} connections={} commands={} protocol_errors={} [{}]",
            self.connected_clients.load(Ordering::Relaxed),
            self.total_connections.load(Ordering::Relaxed),
            self.command_count.load(Ordering::Relaxed),
            self.protocol_errors.load(Ordering::Relaxed),
            stats.join(" ")
        )
    }
}

// src/store.rs

//! 带过期时间的内存 KV 存储
//!
//! - 所有写操作互斥；读操作之间可以并发
//! - 惰性过期：只有访问到「已过期」的 key 时才删除它
//! - 没有过期时间、或过期时间还没到的 key 永远不会被 `get` 删除

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("ERR value is not an integer or out of range: '{0}'")]
    InvalidExpiry(String),
}

/// 返回当前的 UNIX 毫秒
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 单个 key 的存储内容；`expires_at` 为 None 表示永不过期
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

#[derive(Debug, Default)]
pub struct Store {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// 写入 value，并清除该 key 之前的过期时间
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let entry = Entry {
            value: value.into(),
            expires_at: None,
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// 写入 value，过期时间 = 现在 + `relative_ms` 毫秒
    ///
    /// `relative_ms` 不是整数时返回错误，且不做任何修改。
    pub fn set_with_expiry(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        relative_ms: &str,
    ) -> Result<(), StoreError> {
        let delta: i64 = relative_ms
            .parse()
            .map_err(|_| StoreError::InvalidExpiry(relative_ms.to_string()))?;
        let now = now_ms();
        let at = if delta >= 0 {
            now.saturating_add(delta as u64)
        } else {
            now.saturating_sub(delta.unsigned_abs())
        };
        self.set_with_expiry_at(key, value, at);
        Ok(())
    }

    /// 写入 value，并记录绝对过期时间（UNIX 毫秒）
    pub fn set_with_expiry_at(&self, key: impl Into<String>, value: impl Into<String>, at_ms: u64) {
        let entry = Entry {
            value: value.into(),
            expires_at: Some(at_ms),
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// 读取 key；已过期的 key 会在这里被删除
    pub fn get(&self, key: &str) -> Option<String> {
        let now = now_ms();

        // 快路径：共享读锁
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // 慢路径：升级到写锁后重新检查，期间可能已被覆盖或删除
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// 当前所有未过期的 key，顺序不定
    pub fn keys(&self) -> Vec<String> {
        let now = now_ms();
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// 底层条目数，包含已过期但尚未被访问清理的 key
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动时批量导入 `(key, value, 绝对过期毫秒)`，后出现的同名 key 覆盖先出现的
    pub fn bulk_load<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = (String, String, Option<u64>)>,
    {
        let mut entries = self.entries.write();
        let mut loaded = 0;
        for (key, value, expires_at) in items {
            entries.insert(key, Entry { value, expires_at });
            loaded += 1;
        }
        loaded
    }
}

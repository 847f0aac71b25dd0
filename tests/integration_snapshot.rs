// tests/integration_snapshot.rs

//! 集成测试：启动时从 RDB 快照恢复
//! 流程：
//! 1. 在临时目录写入手工构造的快照文件
//! 2. 用 dir + dbfilename 配置调用 bootstrap
//! 3. 通过 engine 执行 GET / KEYS 验证恢复结果与过期语义
//! 4. 损坏或缺失的快照不影响启动，存储为空

use anyhow::Result;
use std::fs;
use tempfile::tempdir;

use crab_kv::{Command, config::Config, engine, server};

/// header + 一个 metadata 字段 + db 0 + resize(3, 2)
const PREAMBLE: &str = concat!(
    "524544495330303131",
    "fa", "09", "72656469732d766572", "05", "372e322e30",
    "fe", "00",
    "fb", "03", "02",
);

/// 辅助：执行一条命令，返回回复文本
fn run(state: &server::ServerState, parts: &[&str]) -> Result<String> {
    let cmd = Command::from_parts(parts.iter().map(|s| s.to_string()).collect())?;
    Ok(String::from_utf8(engine::execute(
        &cmd,
        &state.store,
        &state.config,
    ))?)
}

fn config_for(dir: &std::path::Path, file: &str) -> Config {
    Config {
        dir: dir.to_string_lossy().into_owned(),
        dbfilename: file.to_string(),
        ..Config::default()
    }
}

#[test]
fn test_restore_live_and_expired_entries() -> Result<()> {
    let tmp = tempdir()?;
    let bytes = hex::decode(format!(
        "{}{}",
        PREAMBLE,
        concat!(
            // foo=bar，2100 年过期
            "fc", "00d8c32cbb030000", "00", "03666f6f", "03626172",
            // old=gone，1970 年就过期了
            "fc", "e803000000000000", "00", "036f6c64", "04676f6e65",
            // plain=1，无过期
            "00", "05706c61696e", "c001",
            "ff", "0000000000000000",
        )
    ))?;
    fs::write(tmp.path().join("dump.rdb"), bytes)?;

    let state = server::bootstrap(config_for(tmp.path(), "dump.rdb"));

    assert_eq!(run(&state, &["GET", "foo"])?, "$3\r\nbar\r\n");
    assert_eq!(run(&state, &["GET", "plain"])?, "$1\r\n1\r\n");
    assert_eq!(run(&state, &["GET", "old"])?, "$-1\r\n", "已过期的条目不可见");
    assert_eq!(run(&state, &["GET", "old"])?, "$-1\r\n");

    let mut keys = state.store.keys();
    keys.sort();
    assert_eq!(keys, vec!["foo".to_string(), "plain".to_string()]);
    Ok(())
}

#[test]
fn test_single_expiring_entry() -> Result<()> {
    let tmp = tempdir()?;
    let bytes = hex::decode(format!(
        "{}{}",
        PREAMBLE,
        concat!(
            "fd", "005786f4", "00", "03626172", "0362617a",
            "ff",
        )
    ))?;
    fs::write(tmp.path().join("one.rdb"), bytes)?;

    let state = server::bootstrap(config_for(tmp.path(), "one.rdb"));
    assert_eq!(state.store.len(), 1);
    assert_eq!(run(&state, &["KEYS", "*"])?, "*1\r\n$3\r\nbar\r\n");
    assert_eq!(run(&state, &["GET", "bar"])?, "$3\r\nbaz\r\n");
    Ok(())
}

#[test]
fn test_corrupt_snapshot_starts_empty() -> Result<()> {
    let tmp = tempdir()?;
    // 第一条完整，第二条截断：整次加载都要放弃
    let bytes = hex::decode(format!(
        "{}{}",
        PREAMBLE,
        concat!("00", "0161", "0131", "00", "0162", "05"),
    ))?;
    fs::write(tmp.path().join("broken.rdb"), bytes)?;

    let state = server::bootstrap(config_for(tmp.path(), "broken.rdb"));
    assert!(state.store.is_empty(), "损坏的快照不应留下部分数据");
    assert_eq!(run(&state, &["KEYS", "*"])?, "$-1\r\n");

    // 错误的 opcode 同样放弃
    fs::write(tmp.path().join("bad-op.rdb"), hex::decode("524544495330303131fb0000")?)?;
    let state = server::bootstrap(config_for(tmp.path(), "bad-op.rdb"));
    assert!(state.store.is_empty());
    Ok(())
}

#[test]
fn test_missing_snapshot_starts_empty() -> Result<()> {
    let tmp = tempdir()?;
    let state = server::bootstrap(config_for(tmp.path(), "nope.rdb"));
    assert!(state.store.is_empty());
    assert_eq!(
        run(&state, &["CONFIG", "GET", "dbfilename"])?,
        "*2\r\n$10\r\ndbfilename\r\n$8\r\nnope.rdb\r\n"
    );
    Ok(())
}

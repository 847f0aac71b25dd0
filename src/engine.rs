// src/engine.rs

//! engine 模块：
//! - 接收已经解码、校验过命令名的 [`Command`]
//! - 检查参数个数，读写 [`Store`]
//! - 返回编码好的 RESP 回复字节，网络层直接写回客户端
//!
//! 参数错误只返回错误回复，不影响连接；被拒绝的命令不会修改存储。

use crate::command::{Command, CommandKind};
use crate::config::Config;
use crate::protocol;
use crate::store::Store;

/// 执行一条命令并返回回复
pub fn execute(cmd: &Command, store: &Store, config: &Config) -> Vec<u8> {
    // 1. 参数个数检查
    if !cmd.has_enough_args() {
        return protocol::error(&format!(
            "ERR wrong number of arguments for '{}' command",
            cmd.kind().name().to_lowercase()
        ));
    }

    let args = cmd.args();
    match cmd.kind() {
        CommandKind::Ping => protocol::simple_string("PONG"),

        CommandKind::Echo => protocol::simple_string(&args.join(" ")),

        // SET key value [opt ms]：恰好 4 个参数时第 4 个是相对过期毫秒数
        CommandKind::Set => {
            let (key, value) = (&args[0], &args[1]);
            if args.len() == 4 {
                if let Err(e) = store.set_with_expiry(key.as_str(), value.as_str(), &args[3]) {
                    return protocol::error(&e.to_string());
                }
            } else {
                store.set(key.as_str(), value.as_str());
            }
            protocol::simple_string("OK")
        }

        CommandKind::Get => match store.get(&args[0]) {
            Some(value) => protocol::bulk_string(&value),
            None => protocol::null_bulk_string(),
        },

        // CONFIG GET <dir|dbfilename>
        CommandKind::Config => {
            let sub = &args[0];
            if !sub.eq_ignore_ascii_case("GET") {
                return protocol::error(&format!(
                    "ERR unsupported CONFIG subcommand '{}'",
                    sub
                ));
            }
            match config.get(&args[1]) {
                Some((name, value)) => protocol::bulk_array(&[name, value]),
                None => protocol::error(&format!(
                    "ERR unsupported CONFIG parameter '{}'",
                    args[1]
                )),
            }
        }

        // KEYS pattern：pattern 被忽略，返回全部存活的 key
        CommandKind::Keys => {
            let keys = store.keys();
            if keys.is_empty() {
                protocol::null_bulk_string()
            } else {
                protocol::bulk_array(&keys[..])
            }
        }
    }
}

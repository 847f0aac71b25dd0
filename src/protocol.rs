// src/protocol.rs

//! RESP 子集的编解码：
//! - 请求只接受「bulk string 数组」形式：`*<n>\r\n` + n 组 `$<len>\r\n<payload>\r\n`
//! - 回复支持 simple string / bulk string / null bulk string / bulk array / error
//!
//! 解码按行读取，`$<len>` 只校验是整数，不强制与 payload 长度一致；
//! 长度写错只会让数据错位，不会让连接崩溃。

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::command::Command;

const CRLF: &[u8] = b"\r\n";

/// 帧解码失败的原因；任何一种都会让当前连接关闭
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol error: expected '{expected}', got '{found}'")]
    UnexpectedMarker { expected: char, found: String },

    #[error("protocol error: invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("protocol error: negative element count {0}")]
    NegativeCount(i64),

    #[error("protocol error: stream ended inside a frame")]
    UnexpectedEof,

    #[error("protocol error: empty command frame")]
    EmptyFrame,

    #[error("unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 读取一帧并转换成 [`Command`]
///
/// - `Ok(Some(cmd))`：读到一条完整、已知的命令
/// - `Ok(None)`：在新帧开始前对端正常关闭
/// - `Err(_)`：帧格式错误、帧内提前 EOF、或命令名未知
pub async fn decode_frame<R>(reader: &mut R) -> Result<Option<Command>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_frame(reader).await? {
        Some(parts) => Command::from_parts(parts).map(Some),
        None => Ok(None),
    }
}

/// 读取一帧原始的 bulk string 数组，不做命令校验
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<String>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    // 1) "*<n>"：一个字节都没读到就是干净的断开
    let Some(header) = read_line(reader, &mut buf).await? else {
        return Ok(None);
    };
    let count = parse_prefixed(&header, '*')?;
    if count < 0 {
        return Err(ProtocolError::NegativeCount(count));
    }

    // 2) n 组 "$<len>" + payload
    let count = count as usize;
    let mut parts = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let len_line = read_line(reader, &mut buf)
            .await?
            .ok_or(ProtocolError::UnexpectedEof)?;
        parse_prefixed(&len_line, '$')?;

        let payload = read_line(reader, &mut buf)
            .await?
            .ok_or(ProtocolError::UnexpectedEof)?;
        parts.push(payload);
    }

    Ok(Some(parts))
}

/// 读一行并去掉行尾的 CRLF
///
/// 流在行首结束返回 `None`；读到部分内容却没有换行符视为帧内 EOF。
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<String>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(ProtocolError::UnexpectedEof);
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    // 非 UTF-8 字节替换为 U+FFFD，不断开连接
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// 校验前缀字符并把剩余部分解析为整数
fn parse_prefixed(line: &str, marker: char) -> Result<i64, ProtocolError> {
    let Some(rest) = line.strip_prefix(marker) else {
        return Err(ProtocolError::UnexpectedMarker {
            expected: marker,
            found: line.chars().next().map(String::from).unwrap_or_default(),
        });
    };
    // 只接受十进制：可选的 '-' 后跟至少一位数字，不允许 '+' 和空白
    let unsigned = rest.strip_prefix('-').unwrap_or(rest);
    if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidInteger(rest.to_string()));
    }
    rest.parse::<i64>()
        .map_err(|_| ProtocolError::InvalidInteger(rest.to_string()))
}

/// `+<s>\r\n`
pub fn simple_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 3);
    out.push(b'+');
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(CRLF);
    out
}

/// `-<msg>\r\n`
pub fn error(msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(msg.len() + 3);
    out.push(b'-');
    out.extend_from_slice(msg.as_bytes());
    out.extend_from_slice(CRLF);
    out
}

/// `$<len>\r\n<s>\r\n`，len 为字节数
pub fn bulk_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 16);
    write_bulk(&mut out, s);
    out
}

/// `$-1\r\n`
pub fn null_bulk_string() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// `*<n>\r\n` 后接 n 个 bulk string
pub fn bulk_array<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        write_bulk(&mut out, item.as_ref());
    }
    out
}

fn write_bulk(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(format!("${}\r\n", s.len()).as_bytes());
    out.extend_from_slice(s.as_bytes());
    out.extend_from_slice(CRLF);
}

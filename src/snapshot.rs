// src/snapshot.rs

//! RDB 快照加载器（只读）
//!
//! 文件布局，单次顺序读取，不回退：
//!
//! ```text
//! +-----------+------------------------+---------------+---------------------+-----------+------+
//! | header 9B | 0xFA key value ...     | 0xFE db-index | 0xFB size size      | entries.. | 0xFF |
//! | REDIS0011 | (metadata，可重复)      | (长度编码)     | (两个长度编码整数)    |           |      |
//! +-----------+------------------------+---------------+---------------------+-----------+------+
//!
//! entry := [0xFD secs:u32le | 0xFC ms:u64le] type:u8 key value
//! ```
//!
//! 解码器只产出有序的条目列表，不接触存储；任何 I/O 错误或结构错误都会让整次加载失败。

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

/// 快照头长度：魔数 "REDIS" + 4 位版本号
pub const HEADER_LEN: usize = 9;

pub const OP_AUX: u8 = 0xFA;
pub const OP_RESIZEDB: u8 = 0xFB;
pub const OP_EXPIRETIME_MS: u8 = 0xFC;
pub const OP_EXPIRETIME: u8 = 0xFD;
pub const OP_SELECTDB: u8 = 0xFE;
pub const OP_EOF: u8 = 0xFF;

const ENC_INT8: u8 = 0xC0;
const ENC_INT16: u8 = 0xC1;
const ENC_INT32: u8 = 0xC2;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot truncated")]
    Truncated,

    #[error("unexpected opcode 0x{found:02X} in {section} section (expected 0x{expected:02X})")]
    UnexpectedOpcode {
        section: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("unsupported length encoding 0x{0:02X}")]
    UnsupportedLengthEncoding(u8),
}

/// 快照中的一条 key/value；`expires_at_ms` 为绝对 UNIX 毫秒
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    pub expires_at_ms: Option<u64>,
}

/// 一次完整解码的结果
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub header: [u8; HEADER_LEN],
    pub metadata: HashMap<String, String>,
    pub db_index: u32,
    pub hash_table_size: u32,
    pub expire_table_size: u32,
    pub entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    /// 头部的可读形式，例如 "REDIS0011"
    pub fn header_str(&self) -> String {
        String::from_utf8_lossy(&self.header).into_owned()
    }
}

/// 打开并解码快照文件
pub fn load<P: AsRef<Path>>(path: P) -> Result<Snapshot, SnapshotError> {
    let file = File::open(path.as_ref())?;
    let snapshot = parse(BufReader::new(file))?;
    info!(
        path = %path.as_ref().display(),
        header = %hex::encode(snapshot.header),
        metadata = snapshot.metadata.len(),
        entries = snapshot.entries.len(),
        "snapshot decoded"
    );
    Ok(snapshot)
}

/// 从任意字节流解码快照
pub fn parse<R: Read>(reader: R) -> Result<Snapshot, SnapshotError> {
    Decoder { reader }.decode()
}

struct Decoder<R> {
    reader: R,
}

impl<R: Read> Decoder<R> {
    fn decode(mut self) -> Result<Snapshot, SnapshotError> {
        let mut snapshot = Snapshot::default();

        // 1) header
        self.read_exact(&mut snapshot.header)?;

        // 2) metadata：0xFA 重复出现，直到 0xFE
        loop {
            match self.read_u8()? {
                OP_AUX => {
                    let key = self.read_string()?;
                    let value = self.read_string()?;
                    debug!(%key, %value, "snapshot aux field");
                    snapshot.metadata.insert(key, value);
                }
                OP_SELECTDB => break,
                found => {
                    return Err(SnapshotError::UnexpectedOpcode {
                        section: "metadata",
                        expected: OP_AUX,
                        found,
                    });
                }
            }
        }

        // 3) db 编号，只读不用
        snapshot.db_index = self.read_length()?;

        // 4) resize hint
        let op = self.read_u8()?;
        if op != OP_RESIZEDB {
            return Err(SnapshotError::UnexpectedOpcode {
                section: "database",
                expected: OP_RESIZEDB,
                found: op,
            });
        }
        snapshot.hash_table_size = self.read_length()?;
        snapshot.expire_table_size = self.read_length()?;
        snapshot
            .entries
            .reserve((snapshot.hash_table_size as usize).min(4096));

        // 5) entries，直到 0xFF
        loop {
            let op = self.read_u8()?;
            let expires_at_ms = match op {
                OP_EOF => break,
                OP_SELECTDB => {
                    let index = self.read_length()?;
                    debug!(index, "ignoring additional database selector");
                    continue;
                }
                OP_RESIZEDB => {
                    self.read_length()?;
                    self.read_length()?;
                    continue;
                }
                OP_EXPIRETIME => {
                    let secs = u32::from_le_bytes(self.read_array()?);
                    self.read_u8()?; // value type
                    Some(u64::from(secs) * 1000)
                }
                OP_EXPIRETIME_MS => {
                    let ms = u64::from_le_bytes(self.read_array()?);
                    self.read_u8()?; // value type
                    Some(ms)
                }
                // opcode 本身就是 value type
                _ => None,
            };

            let key = self.read_string()?;
            let value = self.read_string()?;
            snapshot.entries.push(SnapshotEntry {
                key,
                value,
                expires_at_ms: expires_at_ms.filter(|&ms| ms != 0),
            });
        }

        Ok(snapshot)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), SnapshotError> {
        self.reader.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SnapshotError::Truncated,
            _ => SnapshotError::Io(e),
        })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    /// 字符串：0xC0/0xC1/0xC2 为小端整数，其余字节值 n 表示后面 n 个原始字节
    fn read_string(&mut self) -> Result<String, SnapshotError> {
        let tag = self.read_u8()?;
        let s = match tag {
            ENC_INT8 => self.read_u8()?.to_string(),
            ENC_INT16 => u16::from_le_bytes(self.read_array()?).to_string(),
            ENC_INT32 => u32::from_le_bytes(self.read_array()?).to_string(),
            n => {
                let mut buf = vec![0u8; n as usize];
                self.read_exact(&mut buf)?;
                match String::from_utf8(buf) {
                    Ok(s) => s,
                    Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
                }
            }
        };
        Ok(s)
    }

    /// 长度编码整数，看首字节最高两位：
    /// - `00`：低 6 位
    /// - `01`：低 6 位 + 下一字节，14 位大端
    /// - `10`：后 4 字节，32 位大端
    /// - `11`：特殊字符串编码，这里不支持
    fn read_length(&mut self) -> Result<u32, SnapshotError> {
        let first = self.read_u8()?;
        match first >> 6 {
            0b00 => Ok(u32::from(first & 0x3F)),
            0b01 => {
                let next = self.read_u8()?;
                Ok((u32::from(first & 0x3F) << 8) | u32::from(next))
            }
            0b10 => Ok(u32::from_be_bytes(self.read_array()?)),
            _ => Err(SnapshotError::UnsupportedLengthEncoding(first)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// header + 两个 aux 字段 + db 0 + resize(3, 2)
    const PREAMBLE: &str = concat!(
        "524544495330303131",
        "fa", "09", "72656469732d766572", "05", "372e322e30",
        "fa", "0a", "72656469732d62697473", "c0", "40",
        "fe", "00",
        "fb", "03", "02",
    );

    fn fixture(body: &str) -> Vec<u8> {
        hex::decode(format!("{}{}", PREAMBLE, body)).unwrap()
    }

    #[test]
    fn test_parse_full_snapshot() {
        let bytes = fixture(concat!(
            // foo=bar，毫秒过期 2100-01-01
            "fc", "00d8c32cbb030000", "00", "03666f6f", "03626172",
            // baz=qux，秒级过期 2100-01-01
            "fd", "005786f4", "00", "0362617a", "03717578",
            // num=1234，无过期
            "00", "036e756d", "c1d204",
            "ff", "0000000000000000",
        ));
        let snap = parse(&bytes[..]).unwrap();

        assert_eq!(snap.header_str(), "REDIS0011");
        assert_eq!(snap.metadata.get("redis-ver").map(String::as_str), Some("7.2.0"));
        assert_eq!(snap.metadata.get("redis-bits").map(String::as_str), Some("64"));
        assert_eq!(snap.db_index, 0);
        assert_eq!(snap.hash_table_size, 3);
        assert_eq!(snap.expire_table_size, 2);
        assert_eq!(
            snap.entries,
            vec![
                SnapshotEntry {
                    key: "foo".into(),
                    value: "bar".into(),
                    expires_at_ms: Some(4_102_444_800_000),
                },
                SnapshotEntry {
                    key: "baz".into(),
                    value: "qux".into(),
                    expires_at_ms: Some(4_102_444_800_000),
                },
                SnapshotEntry {
                    key: "num".into(),
                    value: "1234".into(),
                    expires_at_ms: None,
                },
            ]
        );
    }

    #[test]
    fn test_integer_encoded_strings() {
        let bytes = fixture(concat!(
            "00", "c007", "c2", "70110100",
            "ff",
        ));
        let snap = parse(&bytes[..]).unwrap();
        assert_eq!(snap.entries[0].key, "7");
        assert_eq!(snap.entries[0].value, "70000");
    }

    #[test]
    fn test_metadata_may_be_empty() {
        let bytes = hex::decode(concat!(
            "524544495330303039",
            "fe", "00", "fb", "01", "00",
            "00", "0161", "0162",
            "ff",
        ))
        .unwrap();
        let snap = parse(&bytes[..]).unwrap();
        assert!(snap.metadata.is_empty());
        assert_eq!(snap.entries.len(), 1);
    }

    #[test]
    fn test_length_encodings() {
        fn decoder(bytes: &[u8]) -> Decoder<&[u8]> {
            Decoder { reader: bytes }
        }

        assert_eq!(decoder(&[0x0A]).read_length().unwrap(), 10);
        assert_eq!(decoder(&[0x42, 0xBC]).read_length().unwrap(), 0x02BC);
        assert_eq!(
            decoder(&[0x80, 0x00, 0x01, 0x00, 0x00]).read_length().unwrap(),
            65_536
        );

        let mut d = decoder(&[0xC0]);
        assert!(matches!(
            d.read_length(),
            Err(SnapshotError::UnsupportedLengthEncoding(0xC0))
        ));
    }

    #[test]
    fn test_unexpected_metadata_opcode() {
        let bytes = hex::decode("524544495330303131fb").unwrap();
        assert!(matches!(
            parse(&bytes[..]),
            Err(SnapshotError::UnexpectedOpcode { section: "metadata", found: 0xFB, .. })
        ));
    }

    #[test]
    fn test_missing_resize_hint() {
        let bytes = hex::decode("524544495330303131fe0000").unwrap();
        assert!(matches!(
            parse(&bytes[..]),
            Err(SnapshotError::UnexpectedOpcode { section: "database", found: 0x00, .. })
        ));
    }

    #[test]
    fn test_truncated_input() {
        // header 不完整
        assert!(matches!(parse(&b"REDIS"[..]), Err(SnapshotError::Truncated)));

        // value 只写了一半
        let bytes = fixture("00036b6579056162");
        assert!(matches!(parse(&bytes[..]), Err(SnapshotError::Truncated)));

        // 没有 0xFF 结束符
        let bytes = fixture("00036b657901");
        assert!(matches!(parse(&bytes[..]), Err(SnapshotError::Truncated)));
    }

    #[test]
    fn test_additional_db_selector_is_accepted() {
        let bytes = fixture(concat!(
            "00", "0161", "0131",
            "fe", "01", "fb", "01", "00",
            "00", "0162", "0132",
            "ff",
        ));
        let snap = parse(&bytes[..]).unwrap();
        let keys: Vec<_> = snap.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load(tmp.path().join("missing.rdb")).unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }
}

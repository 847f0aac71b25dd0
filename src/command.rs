// src/command.rs

//! 命令表：已知命令名与最少参数个数

use crate::protocol::ProtocolError;

/// 已知命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ping,
    Echo,
    Get,
    Set,
    Config,
    Keys,
}

impl CommandKind {
    /// 名字必须已经大写
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "PING" => Some(Self::Ping),
            "ECHO" => Some(Self::Echo),
            "GET" => Some(Self::Get),
            "SET" => Some(Self::Set),
            "CONFIG" => Some(Self::Config),
            "KEYS" => Some(Self::Keys),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Echo => "ECHO",
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Config => "CONFIG",
            Self::Keys => "KEYS",
        }
    }

    /// 最少参数个数（不含命令名本身）
    ///
    /// KEYS 约定带一个 pattern 参数，即使这里总是返回全部 key。
    pub const fn min_args(self) -> usize {
        match self {
            Self::Ping => 0,
            Self::Echo | Self::Get | Self::Keys => 1,
            Self::Set | Self::Config => 2,
        }
    }
}

/// 一条解码后的请求：大写的命令名 + 位置参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    name: String,
    args: Vec<String>,
}

impl Command {
    /// 第一个元素是命令名（转大写），其余是参数；未知命令直接拒绝
    pub fn from_parts(mut parts: Vec<String>) -> Result<Self, ProtocolError> {
        if parts.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }
        let name = parts.remove(0).to_uppercase();
        let kind = CommandKind::lookup(&name)
            .ok_or_else(|| ProtocolError::UnsupportedCommand(name.clone()))?;
        Ok(Command {
            kind,
            name,
            args: parts,
        })
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// 参数个数是否满足最低要求
    pub fn has_enough_args(&self) -> bool {
        self.args.len() >= self.kind.min_args()
    }
}

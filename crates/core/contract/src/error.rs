//! 错误类别与契约层错误。

use std::fmt;

/// 跨组件统一的错误类别（`ServiceEvent.error` 以 `<kind>: <text>` 形式携带）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Transport,
    Timeout,
    NotFound,
    Conflict,
    Decode,
    PermissionDenied,
    Unsupported,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Decode => "decode",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Internal => "internal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "config" => ErrorKind::Config,
            "transport" => ErrorKind::Transport,
            "timeout" => ErrorKind::Timeout,
            "not_found" => ErrorKind::NotFound,
            "conflict" => ErrorKind::Conflict,
            "decode" => ErrorKind::Decode,
            "permission_denied" => ErrorKind::PermissionDenied,
            "unsupported" => ErrorKind::Unsupported,
            "internal" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }

    /// 格式化为 `<kind>: <text>`。
    pub fn format(&self, text: impl fmt::Display) -> String {
        format!("{}: {}", self.as_str(), text)
    }

    /// 从 `<kind>: <text>` 中拆出类别，无法识别时为 internal。
    pub fn split(error: &str) -> (ErrorKind, &str) {
        match error.split_once(": ") {
            Some((kind, text)) => match ErrorKind::parse(kind) {
                Some(kind) => (kind, text),
                None => (ErrorKind::Internal, error),
            },
            None => (ErrorKind::Internal, error),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务事件编解码错误。
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    /// 对端在应答中返回的错误。
    #[error("{0}")]
    Remote(String),
}

impl ContractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContractError::Decode(_) | ContractError::Encode(_) => ErrorKind::Decode,
            ContractError::Remote(text) => ErrorKind::split(text).0,
        }
    }
}

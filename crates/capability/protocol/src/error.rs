//! 协议错误类型定义

use domain::duration::DurationError;

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// MQTT 错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// 串口错误
    #[error("serial error: {0}")]
    Serial(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 连接未就绪或已关闭
    #[error("transport not connected")]
    NotConnected,
}

impl From<DurationError> for ProtocolError {
    fn from(err: DurationError) -> Self {
        ProtocolError::ConfigParse(err.to_string())
    }
}

use contract::ErrorKind;
use mc_bus::BusError;
use mc_crypto::CryptoError;
use mc_protocol::ProtocolError;
use mc_scheduler::SchedulerError;
use mc_script::ScriptError;

/// 网关错误。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid gateway config: {0}")]
    Config(String),
    #[error("unsupported provider type `{0}`")]
    Unsupported(String),
    #[error("gateway `{0}` is not running")]
    NotRunning(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("no acknowledgement for {0}")]
    AckTimeout(String),
    #[error("no free node id on gateway {0}")]
    NodeIdExhausted(String),
    #[error("firmware error: {0}")]
    Firmware(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Config(_) | GatewayError::Scheduler(_) => ErrorKind::Config,
            GatewayError::Unsupported(_) => ErrorKind::Unsupported,
            GatewayError::NotRunning(_) => ErrorKind::NotFound,
            GatewayError::Encode(_) | GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::AckTimeout(_) => ErrorKind::Timeout,
            GatewayError::NodeIdExhausted(_) => ErrorKind::Conflict,
            GatewayError::Protocol(ProtocolError::Timeout(_)) => ErrorKind::Timeout,
            GatewayError::Protocol(ProtocolError::ConfigParse(_)) => ErrorKind::Config,
            GatewayError::Protocol(_) => ErrorKind::Transport,
            GatewayError::Script(err) => err.kind(),
            GatewayError::Bus(err) => err.kind(),
            GatewayError::Firmware(_) | GatewayError::Crypto(_) | GatewayError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// 传输未连接（用于把网关状态降为 down）。
    pub fn is_disconnected(&self) -> bool {
        matches!(self, GatewayError::Protocol(ProtocolError::NotConnected))
    }
}

use contract::ErrorKind;
use mc_bus::BusError;
use mc_crypto::CryptoError;
use mc_protocol::ProtocolError;
use mc_script::ScriptError;
use mc_storage::StorageError;

/// 处理器错误。
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid handler config: {0}")]
    Config(String),
    #[error("unsupported handler type `{0}`")]
    Unsupported(String),
    #[error("handler `{0}` is not running")]
    NotRunning(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Config(_) => ErrorKind::Config,
            HandlerError::Unsupported(_) => ErrorKind::Unsupported,
            HandlerError::NotRunning(_) => ErrorKind::NotFound,
            HandlerError::Transport(_) | HandlerError::Protocol(_) => ErrorKind::Transport,
            HandlerError::Script(err) => err.kind(),
            HandlerError::Storage(err) => err.kind(),
            HandlerError::Bus(err) => err.kind(),
            HandlerError::Crypto(_) | HandlerError::Io(_) => ErrorKind::Internal,
        }
    }
}

use contract::ErrorKind;
use mc_bus::BusError;
use mc_storage::StorageError;

/// 消息处理错误。
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("invalid message: {0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ProcessorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessorError::Invalid(_) => ErrorKind::Decode,
            ProcessorError::Storage(err) => err.kind(),
            ProcessorError::Bus(err) => err.kind(),
        }
    }
}

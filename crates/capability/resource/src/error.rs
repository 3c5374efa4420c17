use contract::ErrorKind;
use domain::quick_id::QuickIdError;
use mc_bus::BusError;
use mc_scheduler::SchedulerError;
use mc_storage::StorageError;

/// 资源服务错误。
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    Config(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{0} is read only")]
    ReadOnly(String),
    #[error(transparent)]
    QuickId(#[from] QuickIdError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ResourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResourceError::Decode(_) => ErrorKind::Decode,
            ResourceError::Config(_) | ResourceError::QuickId(_) | ResourceError::Scheduler(_) => {
                ErrorKind::Config
            }
            ResourceError::Unsupported(_) => ErrorKind::Unsupported,
            ResourceError::ReadOnly(_) => ErrorKind::PermissionDenied,
            ResourceError::Storage(err) => err.kind(),
            ResourceError::Bus(err) => err.kind(),
        }
    }
}

impl From<contract::ContractError> for ResourceError {
    fn from(err: contract::ContractError) -> Self {
        ResourceError::Bus(err.into())
    }
}

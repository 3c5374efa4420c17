use contract::ErrorKind;
use mc_bus::BusError;
use mc_scheduler::SchedulerError;
use mc_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum SystemJobsError {
    #[error("invalid system jobs config: {0}")]
    Config(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl SystemJobsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SystemJobsError::Config(_) | SystemJobsError::Scheduler(_) => ErrorKind::Config,
            SystemJobsError::Storage(err) => err.kind(),
            SystemJobsError::Bus(err) => err.kind(),
        }
    }
}

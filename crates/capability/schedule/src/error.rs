use contract::ErrorKind;
use mc_bus::BusError;
use mc_scheduler::SchedulerError;
use mc_script::ScriptError;
use mc_variable::VariableError;

/// 计划服务错误。
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid schedule `{0}`: {1}")]
    Config(String, String),
    #[error("schedule `{0}` is not loaded")]
    NotLoaded(String),
    #[error("location is not configured for sun based schedule `{0}`")]
    NoLocation(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::Config(..) | ScheduleError::NoLocation(_) | ScheduleError::Scheduler(_) => {
                ErrorKind::Config
            }
            ScheduleError::NotLoaded(_) => ErrorKind::NotFound,
            ScheduleError::Decode(_) => ErrorKind::Decode,
            ScheduleError::Variable(err) => err.kind(),
            ScheduleError::Script(err) => err.kind(),
            ScheduleError::Bus(err) => err.kind(),
        }
    }
}

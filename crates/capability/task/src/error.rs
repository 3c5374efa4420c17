use contract::ErrorKind;
use mc_bus::BusError;
use mc_scheduler::SchedulerError;
use mc_script::ScriptError;
use mc_variable::VariableError;

/// 任务引擎错误。
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid task config: {0}")]
    Config(String),
    #[error("task `{0}` is not loaded")]
    NotLoaded(String),
    #[error("unsupported entity type `{0}`")]
    EntityType(String),
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

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Config(_) | TaskError::Scheduler(_) => ErrorKind::Config,
            TaskError::NotLoaded(_) => ErrorKind::NotFound,
            TaskError::EntityType(_) => ErrorKind::Unsupported,
            TaskError::Decode(_) => ErrorKind::Decode,
            TaskError::Variable(err) => err.kind(),
            TaskError::Script(err) => err.kind(),
            TaskError::Bus(err) => err.kind(),
        }
    }
}

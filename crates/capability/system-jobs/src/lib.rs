//! 系统作业：由核心调度器驱动的周期性维护任务，
//! 也可通过 `internal.system_jobs` 命令立即执行或重载。

pub mod error;
pub mod jobs;

pub use error::SystemJobsError;
pub use jobs::{
    JOB_NODE_STATE, JOB_PREFIX, JOB_SUNRISE, JOB_TELEMETRY, SystemJobs, SystemJobsContext,
};

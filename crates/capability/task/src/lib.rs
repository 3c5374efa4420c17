//! # 任务引擎
//!
//! 任务是变量之上的规则：由实体事件或周期轮询触发，评估结果经防抖后
//! 把渲染好的参数发给处理器（`message.notify_handler`）。
//!
//! 运行状态（`lastEvaluation`、`lastStatus`、`executedCount` 等）经资源服务回写存储；
//! `autoDisable` 的任务在首次执行后由资源服务禁用。

pub mod dampening;
pub mod engine;
pub mod error;
pub mod evaluator;

pub use dampening::{ExecutionHistory, Verdict};
pub use engine::{
    Evaluation, SCHEDULE_PREFIX, TaskContext, TaskEngine, TaskListeners, is_candidate, materialize,
    polling_job_name,
};
pub use error::TaskError;
pub use evaluator::{IS_TRIGGERED, evaluate, evaluate_rule};

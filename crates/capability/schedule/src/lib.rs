//! # 用户计划服务
//!
//! 计划是不带规则的定时任务：到点解析变量、渲染参数并通知处理器。
//! 每个计划以 `mc_user_schedule_<id>` 安装到核心调度器。

pub mod error;
pub mod service;
pub mod trigger;

pub use error::ScheduleError;
pub use service::{SCHEDULE_PREFIX, ScheduleContext, ScheduleService, job_name};
pub use trigger::{derive_spec, is_valid_at, on_date_window};

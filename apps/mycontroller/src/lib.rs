//! MyController 运行时装配：命令行、版本信息、健康检查接口与各组件的启停顺序。
//!
//! 三个二进制共用本库：
//! - `server`：总线、存储、资源服务、消息处理器、网关、处理器、任务、计划与系统作业
//! - `gateway`：只运行网关服务
//! - `handler`：只运行处理器服务

pub mod cli;
pub mod error;
pub mod runtime;
pub mod shutdown;
pub mod version;
pub mod web;

pub use error::AppError;
pub use runtime::{GatewayRuntime, HandlerRuntime, ServerRuntime};
pub use shutdown::ShutdownSignal;
pub use version::{VERSION, VersionInfo};

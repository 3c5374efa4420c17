//! 资源服务：总线命令与存储之间的仲裁者，也是实体 `state` 的唯一写入方。
//!
//! - [`service`]：`service.resource_server` 分发、应答、运行时通知
//! - [`reconnect`]：每网关一个的重连计时器
//! - [`action`]：资源动作目标解析
//! - [`firmware`]：固件分块

pub mod action;
pub mod error;
pub mod firmware;
pub mod managed;
pub mod reconnect;
pub mod service;

pub use action::{Target, Toggle};
pub use error::ResourceError;
pub use firmware::split_blocks;
pub use managed::Managed;
pub use reconnect::{RECONNECT_PREFIX, ReconnectStore, reconnect_job_name};
pub use service::{ResourceContext, ResourceService};

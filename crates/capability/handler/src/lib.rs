//! # 处理器运行时
//!
//! 处理器是通知出口：任务与计划把参数映射发到 `message.notify_handler`，
//! 运行时按 `id` 找到实例并调用插件。
//!
//! 支持的插件：`noop`、`resource`、`email`、`telegram`、`mqtt`、`webhook`、`backup`。
//! 参数中带 `type` 的结构化条目只交给同类型处理器，纯字符串条目交给所有处理器。

pub mod error;
pub mod plugin;
pub mod plugins;
pub mod service;

pub use error::HandlerError;
pub use plugin::{Handler, HandlerContext, RoutedParams, parse_spec, route_params};
pub use plugins::create_handler;
pub use service::{HandlerListeners, HandlerService, RELOAD_DELAY};

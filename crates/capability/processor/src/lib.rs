//! # 消息处理器
//!
//! 网关解码后的规范化消息经 `message.to_message_processor` 到达，
//! 在这里变成节点、源、字段的持久化变更与实体事件。

pub mod error;
pub mod processor;

pub use error::ProcessorError;
pub use processor::MessageProcessor;

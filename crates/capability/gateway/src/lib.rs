//! # 网关 provider 运行时
//!
//! 网关是与物理桥接设备的连接。运行时为每个启用的网关创建 provider、
//! 打开传输、启动报文日志，并把收到的原始帧解码为规范化消息发往
//! `message.to_message_processor`；下发方向订阅 `message.to_provider.<id>`。
//!
//! provider：
//! - `mysensors_v2`：串口 / 以太网 / MQTT，带确认重发、节点 ID 分配、OTA 固件服务
//! - `http`：节点端点 + 周期请求
//! - `mqtt`：通用 MQTT，脚本改写 topic 与载荷

pub mod error;
pub mod http;
pub mod logger;
pub mod mqtt;
pub mod mysensors;
pub mod provider;
pub mod service;

pub use error::GatewayError;
pub use logger::{FileLogger, FileLoggerConfig, MessageLogger, VoidLogger, create_logger};
pub use mysensors::{MySensorsConfig, MySensorsProvider};
pub use provider::{
    PROVIDER_HTTP, PROVIDER_MQTT, PROVIDER_MYSENSORS, Provider, ProviderContext, create_provider,
    messages_from_value,
};
pub use service::{GatewayContext, GatewayService, RELOAD_DELAY};

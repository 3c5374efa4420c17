//! # 共享传输
//!
//! 网关 provider 与处理器插件共用的底层连接：
//! - **MQTT**：rumqttc 客户端，断线自动重连并重新订阅
//! - **TCP Client**：以太网网关，按行分帧，断线按间隔重连
//! - **Serial**：串口网关，按行分帧
//!
//! 每个传输在后台任务中读取数据，并通过 [`RxHandler`] 回调上交 [`domain::RawMessage`]。

pub mod error;
mod line;
pub mod mqtt;
pub mod serial;
pub mod tcp_client;
pub mod types;

pub use error::ProtocolError;
pub use mqtt::{MqttClient, MqttConfig, qos_from_u8, split_topics};
pub use serial::{SerialConfig, SerialTransport};
pub use tcp_client::{TcpClientConfig, TcpClientTransport};
pub use types::{OTHER_TOPIC, RxHandler, Transport, parse_config};

pub use rumqttc::QoS;

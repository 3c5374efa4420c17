//! 传输抽象

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::RawMessage;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// 接收回调：传输层收到的每一帧封装为原始报文（`isReceived = true`）。
pub type RxHandler = Arc<dyn Fn(RawMessage) + Send + Sync>;

/// MQTT 报文的 topic 存放在 `others.topic`。
pub const OTHER_TOPIC: &str = "topic";

/// 已建立的传输连接。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 写出一帧。
    async fn write(&self, message: &RawMessage) -> Result<(), ProtocolError>;

    /// 断开并停止后台读循环。
    async fn close(&self);
}

/// 从 provider 配置映射解析出传输配置。
pub fn parse_config<T: DeserializeOwned>(spec: &domain::Spec) -> Result<T, ProtocolError> {
    serde_json::from_value(serde_json::Value::Object(spec.clone()))
        .map_err(|err| ProtocolError::ConfigParse(err.to_string()))
}

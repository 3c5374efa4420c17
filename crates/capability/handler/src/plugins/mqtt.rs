//! MQTT 处理器：长连接客户端（断线自动重连），把参数发布到 topic。
//!
//! 结构化参数 `{type: mqtt, topic, qos, data}`；纯字符串参数发布到 `<publish>/<参数名>`。

use crate::error::HandlerError;
use crate::plugin::{Handler, RoutedParams, TYPE_MQTT};
use async_trait::async_trait;
use mc_protocol::{MqttClient, MqttConfig, RxHandler, Transport, qos_from_u8, split_topics};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct MqttData {
    topic: String,
    qos: Option<u8>,
    data: serde_json::Value,
}

impl Default for MqttData {
    fn default() -> Self {
        Self {
            topic: String::new(),
            qos: None,
            data: serde_json::Value::Null,
        }
    }
}

pub struct MqttHandler {
    id: String,
    config: MqttConfig,
    client: RwLock<Option<MqttClient>>,
}

impl MqttHandler {
    pub fn new(id: &str, config: MqttConfig) -> Self {
        Self {
            id: id.to_string(),
            config,
            client: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Handler for MqttHandler {
    fn handler_type(&self) -> &'static str {
        TYPE_MQTT
    }

    async fn start(&self) -> Result<(), HandlerError> {
        // 处理器只发布，入站报文忽略
        let rx: RxHandler = Arc::new(|_| {});
        let client = MqttClient::connect(&self.id, &self.config, rx).await?;
        *self.client.write().await = Some(client);
        Ok(())
    }

    async fn post(&self, params: &RoutedParams) -> Result<(), HandlerError> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| HandlerError::NotRunning(self.id.clone()))?;
        for (name, data) in params.decode_typed::<MqttData>()? {
            let payload = match &data.data {
                serde_json::Value::String(text) => text.clone().into_bytes(),
                other => serde_json::to_vec(other)
                    .map_err(|err| HandlerError::Config(err.to_string()))?,
            };
            let qos = qos_from_u8(data.qos.unwrap_or(self.config.qos));
            for topic in split_topics(&data.topic) {
                client.publish_with_qos(&topic, payload.clone(), qos).await?;
                debug!(target: "mc.handler", handler_id = %self.id, parameter = %name, topic = %topic, "mqtt_handler_published");
            }
        }
        let prefix = self.config.publish.trim_end_matches('/');
        for (name, text) in &params.plain {
            let topic = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            client.publish(&topic, text.clone().into_bytes()).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(client) = self.client.write().await.take() {
            client.close().await;
        }
    }
}

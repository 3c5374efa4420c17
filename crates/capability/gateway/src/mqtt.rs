//! 通用 MQTT provider。
//!
//! 下发：默认把规范化消息的 JSON 发布到 `protocol.publish`；节点配置了脚本时，
//! 脚本可改写 `topicOut` 与 `dataOut`（全局变量 `data` 为消息本身）。
//! topic 可用逗号分隔多个。
//!
//! 接收：配置 `receiveFormatter` 时脚本读取 `dataIn = {topic, payload}` 并输出
//! `dataOut`（规范化消息或消息数组）；否则载荷本身必须是规范化消息 JSON。

use crate::error::GatewayError;
use crate::provider::{Provider, ProviderContext, json_or_text, messages_from_value};
use async_trait::async_trait;
use domain::{Message, RawMessage};
use mc_protocol::{MqttClient, MqttConfig, OTHER_TOPIC, RxHandler, Transport};
use mc_script::{execute_script, script_timeout};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttNodeConfig {
    pub script: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GenericMqttConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
    pub protocol: MqttConfig,
    pub nodes: BTreeMap<String, MqttNodeConfig>,
    pub receive_formatter: String,
}

pub struct GenericMqttProvider {
    ctx: ProviderContext,
    config: GenericMqttConfig,
    script_timeout: Duration,
    client: RwLock<Option<Arc<MqttClient>>>,
}

impl GenericMqttProvider {
    pub fn new(ctx: ProviderContext, config: GenericMqttConfig) -> Self {
        Self {
            script_timeout: script_timeout(&ctx.gateway.labels),
            ctx,
            config,
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Option<Arc<MqttClient>> {
        self.client.read().ok().and_then(|client| client.clone())
    }

    /// 计算下发的 topic 与载荷。
    async fn format_outbound(&self, message: &Message) -> Result<(String, Vec<u8>), GatewayError> {
        let data = serde_json::to_value(message).map_err(|err| GatewayError::Encode(err.to_string()))?;
        let script = self
            .config
            .nodes
            .get(&message.node_id)
            .map(|node| node.script.trim())
            .unwrap_or_default();
        if script.is_empty() {
            return Ok((self.config.protocol.publish.clone(), data.to_string().into_bytes()));
        }
        let mut globals = serde_json::Map::new();
        globals.insert("data".to_string(), data.clone());
        globals.insert("topicOut".to_string(), Value::String(self.config.protocol.publish.clone()));
        globals.insert("dataOut".to_string(), data);
        let script = format!("{script}\n;({{topicOut: topicOut, dataOut: dataOut}})");
        let result = execute_script(&script, &globals, None, self.script_timeout).await?;
        let topic = result
            .get("topicOut")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = match result.get("dataOut") {
            Some(Value::String(text)) => text.clone().into_bytes(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => other.to_string().into_bytes(),
        };
        Ok((topic, payload))
    }
}

#[async_trait]
impl Provider for GenericMqttProvider {
    fn provider_type(&self) -> &'static str {
        crate::provider::PROVIDER_MQTT
    }

    async fn start(&self, rx: RxHandler) -> Result<(), GatewayError> {
        let client = MqttClient::connect(self.ctx.gateway_id(), &self.config.protocol, rx).await?;
        *self.client.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(client));
        info!(target: "mc.gateway", gateway_id = %self.ctx.gateway_id(), "mqtt_provider_started");
        Ok(())
    }

    async fn post(&self, message: &Message) -> Result<(), GatewayError> {
        let client = self
            .client()
            .ok_or(GatewayError::Protocol(mc_protocol::ProtocolError::NotConnected))?;
        let (topic, payload) = self.format_outbound(message).await?;
        if topic.trim().is_empty() {
            return Err(GatewayError::Config(format!(
                "no publish topic for node `{}`",
                message.node_id
            )));
        }
        let mut raw = RawMessage::new(false, payload);
        raw.set_other(OTHER_TOPIC, topic);
        self.ctx.write(client.as_ref(), &raw).await
    }

    async fn process_received(&self, raw: RawMessage) -> Result<Vec<Message>, GatewayError> {
        let topic = raw.other_str(OTHER_TOPIC).unwrap_or_default().to_string();
        let formatter = self.config.receive_formatter.trim();
        if formatter.is_empty() {
            return messages_from_value(self.ctx.gateway_id(), json_or_text(&raw.data));
        }
        let mut globals = serde_json::Map::new();
        globals.insert(
            "dataIn".to_string(),
            serde_json::json!({ "topic": topic, "payload": raw.data_as_string() }),
        );
        let data_out = execute_script(formatter, &globals, Some("dataOut"), self.script_timeout).await?;
        if data_out.is_null() {
            debug!(target: "mc.gateway", gateway_id = %self.ctx.gateway_id(), topic = %topic, "mqtt_message_skipped");
        }
        messages_from_value(self.ctx.gateway_id(), data_out)
    }

    async fn close(&self) {
        let client = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(client) = client {
            client.close().await;
        }
    }
}

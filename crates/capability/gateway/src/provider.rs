//! Provider 抽象与共享上下文。

use crate::error::GatewayError;
use crate::logger::MessageLogger;
use async_trait::async_trait;
use domain::{Gateway, Message, RawMessage, Spec};
use mc_bus::Bus;
use mc_protocol::{
    MqttClient, MqttConfig, RxHandler, SerialConfig, SerialTransport, TcpClientConfig,
    TcpClientTransport, Transport, parse_config,
};
use mc_scheduler::CoreScheduler;
use mc_script::WebhookClient;
use std::sync::Arc;

pub const PROVIDER_MYSENSORS: &str = "mysensors_v2";
pub const PROVIDER_HTTP: &str = "http";
pub const PROVIDER_MQTT: &str = "mqtt";

pub const PROTOCOL_SERIAL: &str = "serial";
pub const PROTOCOL_ETHERNET: &str = "ethernet";
pub const PROTOCOL_MQTT: &str = "mqtt";

/// 网关 provider。
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_type(&self) -> &'static str;

    /// 打开传输；收到的原始帧交给 `rx`。
    async fn start(&self, rx: RxHandler) -> Result<(), GatewayError>;

    /// 编码并写出规范化消息（需要确认时等待确认）。
    async fn post(&self, message: &Message) -> Result<(), GatewayError>;

    /// 解码收到的原始帧；provider 自己处理的内部报文不返回。
    async fn process_received(&self, raw: RawMessage) -> Result<Vec<Message>, GatewayError>;

    async fn close(&self);
}

/// provider 共享依赖。
#[derive(Clone)]
pub struct ProviderContext {
    pub gateway: Gateway,
    pub bus: Arc<dyn Bus>,
    pub scheduler: Arc<CoreScheduler>,
    pub webhook: WebhookClient,
    pub logger: Arc<dyn MessageLogger>,
}

impl ProviderContext {
    pub fn gateway_id(&self) -> &str {
        &self.gateway.id
    }

    /// 记录并写出一帧。
    pub async fn write(
        &self,
        transport: &dyn Transport,
        message: &RawMessage,
    ) -> Result<(), GatewayError> {
        self.logger.log(message);
        transport.write(message).await?;
        mc_telemetry::record_message_sent();
        Ok(())
    }
}

/// 按 `protocol.type` 打开串口、以太网或 MQTT 传输。
pub async fn open_transport(
    name: &str,
    protocol: &Spec,
    rx: RxHandler,
) -> Result<Arc<dyn Transport>, GatewayError> {
    let protocol_type = protocol
        .get("type")
        .and_then(|value| value.as_str())
        .unwrap_or_default();
    let transport: Arc<dyn Transport> = match protocol_type {
        PROTOCOL_SERIAL => {
            let config: SerialConfig = parse_config(protocol)?;
            Arc::new(SerialTransport::open(name, &config, rx)?)
        }
        PROTOCOL_ETHERNET => {
            let config: TcpClientConfig = parse_config(protocol)?;
            Arc::new(TcpClientTransport::connect(name, &config, rx).await?)
        }
        PROTOCOL_MQTT => {
            let config: MqttConfig = parse_config(protocol)?;
            Arc::new(MqttClient::connect(name, &config, rx).await?)
        }
        other => {
            return Err(GatewayError::Unsupported(format!("protocol `{other}`")));
        }
    };
    Ok(transport)
}

/// 按 `provider.type` 创建 provider。
pub fn create_provider(ctx: ProviderContext) -> Result<Arc<dyn Provider>, GatewayError> {
    let spec = ctx.gateway.provider.clone();
    let provider: Arc<dyn Provider> = match ctx.gateway.provider_type() {
        PROVIDER_MYSENSORS => Arc::new(crate::mysensors::MySensorsProvider::new(
            ctx,
            parse_config(&spec)?,
        )?),
        PROVIDER_HTTP => Arc::new(crate::http::HttpProvider::new(ctx, parse_config(&spec)?)),
        PROVIDER_MQTT => Arc::new(crate::mqtt::GenericMqttProvider::new(
            ctx,
            parse_config(&spec)?,
        )),
        other => return Err(GatewayError::Unsupported(other.to_string())),
    };
    Ok(provider)
}

/// 把 JSON（单条消息或消息数组）转为规范化消息，补齐网关 ID 与接收标记。
pub fn messages_from_value(
    gateway_id: &str,
    value: serde_json::Value,
) -> Result<Vec<Message>, GatewayError> {
    let items = match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            let mut message: Message = serde_json::from_value(item)
                .map_err(|err| GatewayError::Decode(format!("normalized message: {err}")))?;
            message.gateway_id = gateway_id.to_string();
            message.is_received = true;
            if message.id.is_empty() {
                message.id = mc_telemetry::new_correlation_id();
            }
            if message.timestamp.is_none() {
                message.timestamp = Some(chrono::Utc::now());
            }
            Ok(message)
        })
        .collect()
}

/// 文本若是 JSON 则解析，否则保留为字符串。
pub fn json_or_text(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

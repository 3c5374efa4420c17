//! 网关报文：原始帧与规范化消息。

use crate::labels::Labels;
use crate::Spec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 规范化消息类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Presentation,
    #[default]
    Set,
    Request,
    Action,
}

/// 字段的度量类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    #[default]
    None,
    Binary,
    Gauge,
    GaugeFloat,
    Counter,
    String,
    Geo,
}

impl MetricType {
    /// 是否写入指标库。
    pub fn is_timeseries(&self) -> bool {
        !matches!(self, MetricType::None | MetricType::String)
    }

    /// 按度量类型把文本值转换为 JSON 值；无法转换时保留原文本。
    pub fn convert(&self, raw: &str) -> serde_json::Value {
        let text = raw.trim();
        match self {
            MetricType::Binary => match text.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" => serde_json::Value::Bool(true),
                "0" | "off" | "false" => serde_json::Value::Bool(false),
                _ => serde_json::Value::String(raw.to_string()),
            },
            MetricType::Gauge | MetricType::Counter => text
                .parse::<i64>()
                .map(serde_json::Value::from)
                .or_else(|_| text.parse::<f64>().map(serde_json::Value::from))
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
            MetricType::GaugeFloat => text
                .parse::<f64>()
                .map(serde_json::Value::from)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
            _ => serde_json::Value::String(raw.to_string()),
        }
    }
}

/// 节点动作与节点信息字段键。
pub mod keys {
    pub const ACTION_REBOOT: &str = "reboot";
    pub const ACTION_REFRESH_NODE_INFO: &str = "refresh_node_info";
    pub const ACTION_HEARTBEAT_REQUEST: &str = "heartbeat_request";
    pub const ACTION_DISCOVER: &str = "discover";

    pub const NODE_BATTERY: &str = "battery";
    pub const NODE_RSSI: &str = "rssi";
    pub const NODE_NAME: &str = "name";
    pub const NODE_VERSION: &str = "version";
    pub const NODE_LIBRARY_VERSION: &str = "library_version";
    pub const NODE_HEARTBEAT: &str = "heartbeat";
    pub const NODE_LOCKED: &str = "locked";
    pub const NODE_SMART_SLEEP: &str = "smart_sleep";
    pub const NODE_FIRMWARE_STATE: &str = "firmware_state";
    pub const NODE_ID_ALLOCATED: &str = "id_allocated";
}

/// 规范化消息中的单个载荷。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Payload {
    pub key: String,
    pub value: String,
    pub metric_type: MetricType,
    pub unit: String,
    pub labels: Labels,
    pub others: Spec,
}

impl Payload {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }
}

/// 规范化消息（网关无关）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub gateway_id: String,
    pub node_id: String,
    pub source_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payloads: Vec<Payload>,
    pub labels: Labels,
    pub is_ack: bool,
    pub is_received: bool,
    pub is_ack_enabled: bool,
    pub is_sleep_node: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(gateway_id: &str, node_id: &str, source_id: &str, message_type: MessageType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            gateway_id: gateway_id.to_string(),
            node_id: node_id.to_string(),
            source_id: source_id.to_string(),
            message_type,
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payloads.push(payload);
        self
    }

    pub fn first_payload(&self) -> Option<&Payload> {
        self.payloads.first()
    }
}

/// 原始帧（网关线路上的字节或文本）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub is_received: bool,
    pub is_ack_enabled: bool,
    pub data: Vec<u8>,
    pub timestamp: Option<DateTime<Utc>>,
    pub others: Spec,
}

impl RawMessage {
    pub fn new(is_received: bool, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            is_received,
            data: data.into(),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn data_as_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn other_str(&self, key: &str) -> Option<&str> {
        self.others.get(key).and_then(|v| v.as_str())
    }

    pub fn set_other(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.others.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_accepts_words_and_digits() {
        assert_eq!(MetricType::Binary.convert("on"), serde_json::json!(true));
        assert_eq!(MetricType::Binary.convert("0"), serde_json::json!(false));
        assert_eq!(MetricType::Binary.convert("TRUE"), serde_json::json!(true));
    }

    #[test]
    fn gauge_float_falls_back_to_text() {
        assert_eq!(MetricType::GaugeFloat.convert(" 23.5 "), serde_json::json!(23.5));
        assert_eq!(MetricType::GaugeFloat.convert("n/a"), serde_json::json!("n/a"));
    }
}

//! 持久化实体。
//!
//! 每个实体带有不可变的 `id` 与可变的 `modifiedOn`；
//! JSON 字段名统一使用 camelCase。

use crate::labels::Labels;
use crate::state::State;
use crate::Spec;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 实体类型（也用作 `event.<type>` 主题后缀）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Gateway,
    Node,
    Source,
    Field,
    Firmware,
    Handler,
    Task,
    Schedule,
    DataRepository,
    ForwardPayload,
    VirtualDevice,
    VirtualAssistant,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Gateway => "gateway",
            EntityType::Node => "node",
            EntityType::Source => "source",
            EntityType::Field => "field",
            EntityType::Firmware => "firmware",
            EntityType::Handler => "handler",
            EntityType::Task => "task",
            EntityType::Schedule => "schedule",
            EntityType::DataRepository => "data_repository",
            EntityType::ForwardPayload => "forward_payload",
            EntityType::VirtualDevice => "virtual_device",
            EntityType::VirtualAssistant => "virtual_assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let kind = match value {
            "gateway" => EntityType::Gateway,
            "node" => EntityType::Node,
            "source" => EntityType::Source,
            "field" => EntityType::Field,
            "firmware" => EntityType::Firmware,
            "handler" => EntityType::Handler,
            "task" => EntityType::Task,
            "schedule" => EntityType::Schedule,
            "data_repository" => EntityType::DataRepository,
            "forward_payload" => EntityType::ForwardPayload,
            "virtual_device" => EntityType::VirtualDevice,
            "virtual_assistant" => EntityType::VirtualAssistant,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可持久化实体的公共能力。
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const ENTITY_TYPE: EntityType;

    fn id(&self) -> &str;

    fn labels(&self) -> &Labels;

    fn set_modified_on(&mut self, ts: DateTime<Utc>);

    /// 实体的 Quick-ID（不含键路径）。
    fn quick_id(&self) -> String;
}

/// 基于组合键生成稳定 ID。
pub fn stable_id(parts: &[&str]) -> String {
    let name = parts.join(".");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

/// 网关。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Gateway {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    /// Go 风格时长（如 `30s`）；为空时不重连。
    pub reconnect_delay: String,
    pub provider: Spec,
    pub message_logger: Spec,
    pub labels: Labels,
    pub state: State,
    pub modified_on: DateTime<Utc>,
    pub last_transaction: Option<DateTime<Utc>>,
}

impl Gateway {
    pub fn provider_type(&self) -> &str {
        self.provider
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }
}

impl Entity for Gateway {
    const ENTITY_TYPE: EntityType = EntityType::Gateway;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("gw:{}", self.id)
    }
}

/// 节点（网关下的可寻址端点）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub gateway_id: String,
    pub node_id: String,
    pub name: String,
    pub labels: Labels,
    pub others: Spec,
    pub state: State,
    pub last_seen: Option<DateTime<Utc>>,
    pub modified_on: DateTime<Utc>,
}

impl Node {
    pub fn new(gateway_id: &str, node_id: &str) -> Self {
        Self {
            id: stable_id(&[gateway_id, node_id]),
            gateway_id: gateway_id.to_string(),
            node_id: node_id.to_string(),
            name: node_id.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Node {
    const ENTITY_TYPE: EntityType = EntityType::Node;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("nd:{}.{}", self.gateway_id, self.node_id)
    }
}

/// 源（节点下的子设备）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub gateway_id: String,
    pub node_id: String,
    pub source_id: String,
    pub name: String,
    pub labels: Labels,
    pub others: Spec,
    pub modified_on: DateTime<Utc>,
}

impl Source {
    pub fn new(gateway_id: &str, node_id: &str, source_id: &str) -> Self {
        Self {
            id: stable_id(&[gateway_id, node_id, source_id]),
            gateway_id: gateway_id.to_string(),
            node_id: node_id.to_string(),
            source_id: source_id.to_string(),
            name: source_id.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Source {
    const ENTITY_TYPE: EntityType = EntityType::Source;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("sn:{}.{}.{}", self.gateway_id, self.node_id, self.source_id)
    }
}

/// 字段值及其时间戳。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldValue {
    pub value: serde_json::Value,
    pub timestamp: Option<DateTime<Utc>>,
}

/// 字段（源产生的带类型数值）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub gateway_id: String,
    pub node_id: String,
    pub source_id: String,
    pub field_id: String,
    pub name: String,
    pub metric_type: crate::message::MetricType,
    pub unit: String,
    pub current: FieldValue,
    pub previous: FieldValue,
    pub no_change_since: Option<DateTime<Utc>>,
    pub labels: Labels,
    pub others: Spec,
    pub modified_on: DateTime<Utc>,
}

impl Field {
    pub fn new(gateway_id: &str, node_id: &str, source_id: &str, field_id: &str) -> Self {
        Self {
            id: stable_id(&[gateway_id, node_id, source_id, field_id]),
            gateway_id: gateway_id.to_string(),
            node_id: node_id.to_string(),
            source_id: source_id.to_string(),
            field_id: field_id.to_string(),
            name: field_id.to_string(),
            ..Default::default()
        }
    }

    /// 写入新值：current 移至 previous；值变化时刷新 `noChangeSince`。
    pub fn shift_value(&mut self, value: serde_json::Value, timestamp: DateTime<Utc>) {
        let changed = self.current.value != value;
        self.previous = std::mem::take(&mut self.current);
        self.current = FieldValue {
            value,
            timestamp: Some(timestamp),
        };
        if changed || self.no_change_since.is_none() {
            self.no_change_since = Some(timestamp);
        }
    }
}

impl Entity for Field {
    const ENTITY_TYPE: EntityType = EntityType::Field;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!(
            "sf:{}.{}.{}.{}",
            self.gateway_id, self.node_id, self.source_id, self.field_id
        )
    }
}

/// 固件文件信息。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FirmwareFile {
    pub name: String,
    pub internal_name: String,
    /// `sha256:<hex>`
    pub checksum: String,
    pub size: u64,
}

/// 固件。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Firmware {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub firmware_type: String,
    pub version: String,
    pub file: FirmwareFile,
    pub labels: Labels,
    pub modified_on: DateTime<Utc>,
}

impl Entity for Firmware {
    const ENTITY_TYPE: EntityType = EntityType::Firmware;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("fm:{}", self.id)
    }
}

/// 处理器配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandlerConfig {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub handler_type: String,
    pub labels: Labels,
    pub spec: Spec,
    pub state: State,
    pub modified_on: DateTime<Utc>,
}

impl Entity for HandlerConfig {
    const ENTITY_TYPE: EntityType = EntityType::Handler;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("hd:{}", self.id)
    }
}

/// 数据仓库（用户自定义键值数据）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataRepository {
    pub id: String,
    pub description: String,
    pub read_only: bool,
    pub data: Spec,
    pub labels: Labels,
    pub modified_on: DateTime<Utc>,
}

impl Entity for DataRepository {
    const ENTITY_TYPE: EntityType = EntityType::DataRepository;

    fn id(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn set_modified_on(&mut self, ts: DateTime<Utc>) {
        self.modified_on = ts;
    }

    fn quick_id(&self) -> String {
        format!("dr:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_ids_depend_on_composite_key() {
        let a = Node::new("g1", "1");
        let b = Node::new("g1", "1");
        let c = Node::new("g2", "1");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn shift_value_moves_current_to_previous() {
        let mut field = Field::new("g1", "1", "2", "V_TEMP");
        let t0 = Utc::now();
        field.shift_value(serde_json::json!(21.5), t0);
        field.shift_value(serde_json::json!(22.0), t0);
        assert_eq!(field.previous.value, serde_json::json!(21.5));
        assert_eq!(field.current.value, serde_json::json!(22.0));
    }

    #[test]
    fn gateway_serializes_camel_case() {
        let gateway = Gateway {
            id: "g1".to_string(),
            reconnect_delay: "5s".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&gateway).expect("serialize");
        assert_eq!(value["reconnectDelay"], "5s");
        assert!(value.get("messageLogger").is_some());
    }
}

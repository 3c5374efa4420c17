//! 服务事件信封及其载荷。

use crate::error::{ContractError, ErrorKind};
use domain::{Labels, Operator, ScheduleState, Spec, State, TaskState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// 服务类型（`ServiceEvent.type`）。
pub mod kind {
    pub const GATEWAY: &str = "gateway";
    pub const NODE: &str = "node";
    pub const SOURCE: &str = "source";
    pub const FIELD: &str = "field";
    pub const TASK: &str = "task";
    pub const HANDLER: &str = "handler";
    pub const SCHEDULER: &str = "scheduler";
    pub const FIRMWARE: &str = "firmware";
    pub const DATA_REPOSITORY: &str = "data_repository";
    pub const VIRTUAL_ASSISTANT: &str = "virtual_assistant";
    pub const SYSTEM_JOBS: &str = "system_jobs";
    pub const RESOURCE_ACTION: &str = "resource_action";
}

/// 服务命令（`ServiceEvent.command`）。
pub mod command {
    pub const LOAD_ALL: &str = "load_all";
    pub const UNLOAD_ALL: &str = "unload_all";
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
    pub const RELOAD: &str = "reload";
    pub const START: &str = "start";
    pub const STOP: &str = "stop";
    pub const ENABLE: &str = "enable";
    pub const DISABLE: &str = "disable";
    pub const GET: &str = "get";
    pub const LIST: &str = "list";
    pub const SAVE: &str = "save";
    pub const UPDATE_STATE: &str = "update_state";
    pub const SET_LABEL: &str = "set_label";
    pub const BLOCKS: &str = "blocks";
    pub const SET: &str = "set";
    pub const RELOAD_SUNRISE: &str = "reload_sunrise";
    pub const NODE_STATE: &str = "node_state";
    pub const TELEMETRY: &str = "telemetry";
}

/// 总线上的请求/应答信封；`data` 为 JSON 文本。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceEvent {
    #[serde(rename = "type")]
    pub service_type: String,
    pub command: String,
    pub reply_command: String,
    pub reply_topic: String,
    pub id: String,
    pub labels: Labels,
    pub data: String,
    pub error: String,
}

impl ServiceEvent {
    pub fn new(service_type: &str, command: &str) -> Self {
        Self {
            service_type: service_type.to_string(),
            command: command.to_string(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Result<Self, ContractError> {
        self.set_data(data)?;
        Ok(self)
    }

    pub fn set_data<T: Serialize>(&mut self, data: &T) -> Result<(), ContractError> {
        self.data =
            serde_json::to_string(data).map_err(|err| ContractError::Encode(err.to_string()))?;
        Ok(())
    }

    /// 解码 `data`；若携带错误则返回 Remote 错误。
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, ContractError> {
        if !self.error.is_empty() {
            return Err(ContractError::Remote(self.error.clone()));
        }
        serde_json::from_str(&self.data).map_err(|err| ContractError::Decode(err.to_string()))
    }

    pub fn set_error(&mut self, kind: ErrorKind, text: impl std::fmt::Display) {
        self.error = kind.format(text);
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// 构造应答事件（沿用类型与 ID）。
    pub fn reply(&self) -> ServiceEvent {
        ServiceEvent {
            service_type: self.service_type.clone(),
            command: self.reply_command.clone(),
            id: self.id.clone(),
            ..Default::default()
        }
    }
}

/// 组件启动时的加载过滤器（配置文件 `gateway|handler|task|schedule` 段）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceFilter {
    pub disabled: bool,
    pub match_all: bool,
    pub types: Vec<String>,
    pub ids: Vec<String>,
    pub labels: Labels,
}

impl ServiceFilter {
    /// 判断实例是否由本组件负责。
    ///
    /// 未设置任何条件时全部接受；`match_all` 要求所有已设置条件同时满足。
    pub fn matches(&self, id: &str, kind: &str, labels: &Labels) -> bool {
        if self.disabled {
            return false;
        }
        let mut checks = Vec::new();
        if !self.types.is_empty() {
            checks.push(self.types.iter().any(|t| t == kind));
        }
        if !self.ids.is_empty() {
            checks.push(self.ids.iter().any(|i| i == id));
        }
        if !self.labels.is_empty() {
            checks.push(labels.matches(&self.labels));
        }
        if checks.is_empty() {
            return true;
        }
        if self.match_all {
            checks.iter().all(|c| *c)
        } else {
            checks.iter().any(|c| *c)
        }
    }
}

/// 存储查询条件。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub key: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl QueryFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            operator: Operator::Eq,
            value: value.into(),
        }
    }
}

/// `list` 命令载荷。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub filters: Vec<QueryFilter>,
}

/// `update_state` 命令载荷。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityState {
    pub id: String,
    pub state: State,
}

/// 任务运行状态回写（`task` / `update_state`）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskStateUpdate {
    pub id: String,
    pub state: TaskState,
}

/// 计划运行状态回写（`scheduler` / `update_state`）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleStateUpdate {
    pub id: String,
    pub state: ScheduleState,
}

/// `set_label` 命令载荷：值为空字符串的标签会被删除。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelUpdate {
    pub id: String,
    pub labels: Labels,
}

/// 资源动作：按 Quick-ID 或标签定位目标并下发载荷。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceAction {
    pub quick_id: String,
    pub resource_type: String,
    pub labels: Labels,
    pub payload: String,
    /// Go 风格时长，执行前等待。
    pub pre_delay: String,
}

/// 发往处理器的消息。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerMessage {
    pub id: String,
    pub data: Spec,
}

/// 固件分块大小（字节）。
pub const FIRMWARE_BLOCK_SIZE: usize = 512;

/// 固件分块；`data` 为十六进制编码。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FirmwareBlock {
    pub id: String,
    pub block_number: u64,
    pub total_bytes: u64,
    pub is_final: bool,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_without_criteria_accepts_everything() {
        let filter = ServiceFilter::default();
        assert!(filter.matches("g1", "mysensors_v2", &Labels::new()));
        let disabled = ServiceFilter {
            disabled: true,
            ..Default::default()
        };
        assert!(!disabled.matches("g1", "mysensors_v2", &Labels::new()));
    }

    #[test]
    fn filter_match_all_versus_any() {
        let mut filter = ServiceFilter {
            types: vec!["mqtt".to_string()],
            ids: vec!["g2".to_string()],
            ..Default::default()
        };
        assert!(filter.matches("g1", "mqtt", &Labels::new()));
        filter.match_all = true;
        assert!(!filter.matches("g1", "mqtt", &Labels::new()));
        assert!(filter.matches("g2", "mqtt", &Labels::new()));
    }
}

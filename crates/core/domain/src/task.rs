//! 任务配置与运行状态。

use crate::condition::Operator;
use crate::entity::{Entity, EntityType};
use crate::event::EventType;
use crate::labels::Labels;
use crate::variable::VariableSpec;
use crate::webhook::WebhookConfig;
use crate::Spec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 防抖类型。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DampeningType {
    #[default]
    None,
    Consecutive,
    Evaluation,
    ActiveDuration,
}

/// 防抖配置。
///
/// - consecutive：`occurrences` 为连续触发次数 N
/// - evaluation：最近 `evaluation` 次中至少 `occurrences` 次触发
/// - active_duration：持续触发达到 `activeDuration`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dampening {
    #[serde(rename = "type")]
    pub dampening_type: DampeningType,
    pub occurrences: u64,
    pub evaluation: u64,
    pub active_duration: String,
}

/// 评估方式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    #[default]
    Rule,
    Javascript,
    Webhook,
}

/// 规则条件：`variable` 可带键路径（`temp.current.value`）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Condition {
    pub variable: String,
    pub operator: Operator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Rule {
    pub match_all: bool,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluationConfig {
    pub rule: Rule,
    pub javascript: String,
    pub webhook: WebhookConfig,
}

/// 事件过滤条件。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventFilter {
    pub event_types: Vec<EventType>,
    pub entity_types: Vec<String>,
    /// 键路径 → 期望值（字符串比较）。
    pub filters: BTreeMap<String, String>,
}

/// 任务运行状态。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskState {
    pub last_evaluation: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_status: bool,
    pub message: String,
    pub executed_count: u64,
    pub active_since: Option<DateTime<Utc>>,
}

/// 任务配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfig {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    pub labels: Labels,
    pub variables: BTreeMap<String, VariableSpec>,
    pub dampening: Dampening,
    pub trigger_on_event: bool,
    pub event_filter: EventFilter,
    pub execution_interval: String,
    pub evaluation_type: EvaluationType,
    pub evaluation_config: EvaluationConfig,
    pub handler_parameters: Spec,
    pub handlers: Vec<String>,
    pub ignore_duplicate: bool,
    pub auto_disable: bool,
    pub state: TaskState,
    pub modified_on: DateTime<Utc>,
}

impl Entity for TaskConfig {
    const ENTITY_TYPE: EntityType = EntityType::Task;

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
        format!("tk:{}", self.id)
    }
}

//! 计划配置与运行状态。

use crate::entity::{Entity, EntityType};
use crate::labels::Labels;
use crate::variable::VariableSpec;
use crate::webhook::WebhookConfig;
use crate::Spec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    #[default]
    Repeat,
    Cron,
    Simple,
    Sunrise,
    Sunset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
    OnDate,
}

/// 计划参数（按类型使用不同字段）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub repeat_interval: String,
    pub repeat_count: u64,
    pub cron_expression: String,
    pub frequency: Frequency,
    /// 逗号分隔，`0`=周日 ... `6`=周六，或英文缩写。
    pub day_of_week: String,
    /// 逗号分隔的日期（1-31）。
    pub date_of_month: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    /// 日出日落偏移（Go 风格时长，可为负）。
    pub offset: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// 每日时间窗（`HH:MM:SS`，为空表示不限）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Validity {
    pub date: DateRange,
    pub time: TimeRange,
    pub validate_time_everyday: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomVariableType {
    #[default]
    None,
    Javascript,
    Webhook,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomVariableConfig {
    pub javascript: String,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleState {
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: bool,
    pub message: String,
    pub executed_count: u64,
}

/// 计划配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub id: String,
    pub description: String,
    pub enabled: bool,
    pub labels: Labels,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    pub spec: ScheduleSpec,
    pub validity: Validity,
    pub variables: BTreeMap<String, VariableSpec>,
    pub custom_variable_type: CustomVariableType,
    pub custom_variable_config: CustomVariableConfig,
    pub handler_parameters: Spec,
    pub handlers: Vec<String>,
    pub state: ScheduleState,
    pub modified_on: DateTime<Utc>,
}

impl Entity for ScheduleConfig {
    const ENTITY_TYPE: EntityType = EntityType::Schedule;

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
        format!("sk:{}", self.id)
    }
}

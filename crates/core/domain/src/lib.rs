//! 领域模型：网关/节点/源/字段、任务、计划、处理器等实体，
//! 以及实体之间共享的工具（Quick-ID、键路径、条件比较、时长解析、日出日落）。

pub mod condition;
pub mod duration;
pub mod entity;
pub mod event;
pub mod key_path;
pub mod labels;
pub mod message;
pub mod quick_id;
pub mod schedule;
pub mod state;
pub mod sun;
pub mod task;
pub mod variable;
pub mod webhook;

pub use condition::{Operator, compare};
pub use entity::{
    DataRepository, Entity, EntityType, Field, FieldValue, Firmware, FirmwareFile, Gateway,
    HandlerConfig, Node, Source,
};
pub use event::{EntityEvent, EventType};
pub use key_path::get_by_key_path;
pub use labels::Labels;
pub use message::{Message, MessageType, MetricType, Payload, RawMessage};
pub use quick_id::{QuickId, ResourceType};
pub use schedule::{Frequency, ScheduleConfig, ScheduleSpec, ScheduleState, ScheduleType, Validity};
pub use state::{State, Status};
pub use sun::Location;
pub use task::{
    Condition, Dampening, DampeningType, EvaluationType, EventFilter, Rule, TaskConfig, TaskState,
};
pub use variable::VariableSpec;
pub use webhook::WebhookConfig;

/// 动态键值映射（provider / spec / others 等字段使用）。
pub type Spec = serde_json::Map<String, serde_json::Value>;

/// 当前时间（毫秒）。
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

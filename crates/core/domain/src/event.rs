use crate::entity::Entity;
use serde::{Deserialize, Serialize};

/// 实体事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Requested,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
            EventType::Requested => "requested",
        }
    }
}

/// 实体事件（发布到 `event.<entityType>`）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_quick_id: String,
    #[serde(default)]
    pub entity: serde_json::Value,
}

impl EntityEvent {
    pub fn from_entity<T: Entity>(event_type: EventType, entity: &T) -> Self {
        Self {
            event_type,
            entity_type: T::ENTITY_TYPE.as_str().to_string(),
            entity_id: entity.id().to_string(),
            entity_quick_id: entity.quick_id(),
            entity: serde_json::to_value(entity).unwrap_or(serde_json::Value::Null),
        }
    }

    /// 把事件携带的实体还原为具体类型。
    pub fn decode_entity<T: Entity>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.entity.clone())
    }
}
